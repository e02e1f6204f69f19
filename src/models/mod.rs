pub mod product;
pub mod queue;
pub mod renewal;
