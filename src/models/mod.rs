//! Data models for the data-access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod statement;

// Re-export commonly used types
pub use connection::{CacheSettings, DatabaseSettings, DatabaseType};
pub use statement::{Entity, QueryParam, Statement};
