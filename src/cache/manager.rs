//! Key/value store facade.

use crate::cache::connection::{CacheConnectionManager, CacheOperation};
use crate::error::DbResult;
use crate::models::CacheSettings;
use crate::retry::RetryPolicy;

/// Bundles a display name, a description and a [`CacheConnectionManager`].
#[derive(Debug)]
pub struct CacheManager {
    display_name: String,
    description: String,
    connection: CacheConnectionManager,
}

impl CacheManager {
    pub fn new(
        display_name: impl Into<String>,
        description: impl Into<String>,
        settings: CacheSettings,
        retry: RetryPolicy,
    ) -> Self {
        let display_name = display_name.into();
        Self {
            connection: CacheConnectionManager::new(display_name.clone(), settings)
                .with_retry(retry),
            display_name,
            description: description.into(),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn connection(&self) -> &CacheConnectionManager {
        &self.connection
    }

    /// Shortcut for `connection().operation()`.
    pub fn operation(&self) -> DbResult<CacheOperation> {
        self.connection.operation()
    }
}
