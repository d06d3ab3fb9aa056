//! Relational data access.
//!
//! This module provides:
//! - Pool and session management
//! - Retried row inserts and queries
//! - Typed result wrappers
//! - Batched row streaming

pub mod executor;
pub mod macros;
pub mod manager;
mod params;
pub mod pool;
pub mod result;
pub mod stream;
pub mod types;

pub use executor::QueryExecutor;
pub use manager::DatabaseManager;
pub use pool::{ConnectionManager, Session, SessionFactory};
pub use result::{RowResult, RowResults};
pub use sqlx::any::AnyRow;
pub use stream::{RowStream, StreamProgress, StreamState};
pub use types::{KeyPart, RowDecode};
