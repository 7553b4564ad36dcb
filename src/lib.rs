//! PerfectFit offline-first sync engine.
//!
//! Devices keep customers, orders and measurements in a local SQLite store
//! and reconcile them with a central server over a batch HTTP protocol.

pub mod config;
pub mod db;
pub mod models;
pub mod server;
pub mod sync;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
