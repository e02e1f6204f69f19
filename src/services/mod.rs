pub mod coordinator;
pub mod freshness;
pub mod memory_queue;
pub mod product_source;
pub mod queue;
pub mod worker;
