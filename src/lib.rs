//! Resilient data-access layer.
//!
//! Pooled, retried access to a relational store (through sqlx) and a
//! key/value cache (through redis), with typed result wrappers, batched
//! row streaming and a small error taxonomy that never leaks driver detail.

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod models;
pub mod retry;
pub mod state;
pub mod tasks;
pub mod telemetry;

pub use config::Settings;
pub use error::{DbError, DbResult};
pub use retry::RetryPolicy;
pub use state::AppState;
