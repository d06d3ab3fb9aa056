//! Relational store facade.

use crate::db::executor::QueryExecutor;
use crate::db::pool::ConnectionManager;
use crate::error::DbResult;
use crate::models::DatabaseSettings;
use crate::retry::RetryPolicy;
use std::sync::OnceLock;

/// Bundles a display name, a description, a [`ConnectionManager`] and a
/// lazily built [`QueryExecutor`].
#[derive(Debug)]
pub struct DatabaseManager {
    display_name: String,
    description: String,
    connection: ConnectionManager,
    retry: RetryPolicy,
    row_operations: OnceLock<QueryExecutor>,
}

impl DatabaseManager {
    pub fn new(
        display_name: impl Into<String>,
        description: impl Into<String>,
        settings: DatabaseSettings,
        retry: RetryPolicy,
    ) -> Self {
        let display_name = display_name.into();
        Self {
            connection: ConnectionManager::new(display_name.clone(), settings),
            display_name,
            description: description.into(),
            retry,
            row_operations: OnceLock::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The query executor, built on first successful access.
    ///
    /// Fails with `Unavailable` until the connection is connected. Once built,
    /// the executor keeps the session factory it was created with.
    pub fn row_operations(&self) -> DbResult<&QueryExecutor> {
        if let Some(executor) = self.row_operations.get() {
            return Ok(executor);
        }
        let factory = self.connection.session_factory()?;
        Ok(self
            .row_operations
            .get_or_init(|| QueryExecutor::new(factory, self.retry)))
    }
}
