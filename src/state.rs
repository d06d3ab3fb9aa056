//! Application state: the enabled store managers and their lifecycle.

use crate::cache::CacheManager;
use crate::config::Settings;
use crate::db::DatabaseManager;
use crate::error::{DbError, DbResult};
use std::sync::Arc;
use tracing::info;

/// Managers created at startup and torn down at shutdown.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    db: Option<Arc<DatabaseManager>>,
    cache: Option<Arc<CacheManager>>,
}

impl AppState {
    /// Create and connect every store enabled in `settings`.
    ///
    /// Connecting builds clients and pools only; no network round-trip
    /// happens until the first query.
    pub fn setup(settings: &Settings) -> DbResult<Self> {
        let mut state = Self::default();

        if settings.db_enabled {
            let manager = DatabaseManager::new(
                &settings.db_display_name,
                &settings.db_description,
                settings.database_settings()?,
                settings.db_retry_policy(),
            );
            manager.connection().connect()?;
            state.db = Some(Arc::new(manager));
        }

        if settings.cache_enabled {
            let manager = CacheManager::new(
                &settings.cache_display_name,
                &settings.cache_description,
                settings.cache_settings(),
                settings.cache_retry_policy(),
            );
            manager.connection().connect()?;
            state.cache = Some(Arc::new(manager));
        }

        info!(
            db_enabled = state.db.is_some(),
            cache_enabled = state.cache.is_some(),
            "Application state ready"
        );
        Ok(state)
    }

    /// Build a state around managers created by the caller.
    pub fn with_managers(
        db: Option<Arc<DatabaseManager>>,
        cache: Option<Arc<CacheManager>>,
    ) -> Self {
        Self { db, cache }
    }

    pub fn db_manager(&self) -> DbResult<&Arc<DatabaseManager>> {
        self.db
            .as_ref()
            .ok_or_else(|| DbError::unavailable("The relational store"))
    }

    pub fn cache_manager(&self) -> DbResult<&Arc<CacheManager>> {
        self.cache
            .as_ref()
            .ok_or_else(|| DbError::unavailable("The cache store"))
    }

    /// Disconnect every enabled store.
    pub async fn teardown(&self) {
        if let Some(db) = &self.db {
            db.connection().disconnect().await;
        }
        if let Some(cache) = &self.cache {
            cache.connection().disconnect().await;
        }
        info!("Application state torn down");
    }
}
