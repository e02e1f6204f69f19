//! Product data renewal
//!
//! Keeps externally sourced product data fresh: a freshness store records
//! when each product was last renewed, stale products are queued in a
//! claim/release work queue, and a sequential drain loop fetches fresh data
//! until the queue is empty or the product source asks to suspend. The
//! `apw` binary exposes the operator commands; the `worker` binary runs the
//! same renewal on a schedule.

pub mod app_state;
pub mod commands;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
