//! Connection pool management.
//!
//! [`ConnectionManager`] owns one `AnyPool` for a relational store and hands
//! out [`SessionFactory`] handles. A [`Session`] is a single transaction with
//! a queue of staged statements; it is moved between owners, never shared.
//!
//! Lifecycle: uninitialized → connected (`connect`) → disconnected
//! (`disconnect`). `connect` only builds the pool object; physical
//! connections are opened on first use.

use crate::db::params::build_query;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseSettings, DatabaseType, Statement};
use secrecy::ExposeSecret;
use sqlx::any::{AnyConnectOptions, AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, ConnectOptions, Executor, Transaction};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

/// Log a driver failure and translate it into an operation failure.
///
/// The driver error itself stays in the debug log.
pub(crate) fn driver_error(operation: &str, err: sqlx::Error) -> DbError {
    error!(operation, "Database operation failed");
    debug!(operation, error = %err, "Database driver error");
    DbError::operation_failed(operation)
}

/// Owns the pool for one relational store.
#[derive(Debug)]
pub struct ConnectionManager {
    display_name: Arc<str>,
    settings: DatabaseSettings,
    pool: RwLock<Option<AnyPool>>,
}

impl ConnectionManager {
    /// Create a manager. Nothing is connected until [`connect`](Self::connect).
    pub fn new(display_name: impl Into<String>, settings: DatabaseSettings) -> Self {
        Self {
            display_name: Arc::from(display_name.into()),
            settings,
            pool: RwLock::new(None),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// Build the pool from the configured URI.
    ///
    /// No network I/O happens here. Calling it again replaces the pool; the
    /// previous pool is not drained. Must run inside a tokio runtime, which
    /// hosts the pool's maintenance tasks.
    pub fn connect(&self) -> DbResult<()> {
        sqlx::any::install_default_drivers();

        let settings = &self.settings;
        let db_type = settings.db_type();
        let options = self.connect_options(db_type)?;
        let max_connections = (settings.pool_size + settings.max_overflow).max(1);

        let mut pool_options = AnyPoolOptions::new()
            .min_connections(settings.pool_size.min(max_connections))
            .max_connections(max_connections)
            .test_before_acquire(settings.pre_ping);

        if let (Some(DatabaseType::PostgreSQL), Some(schema)) = (db_type, &settings.schema) {
            let set_search_path = search_path_statement(schema);
            pool_options = pool_options.after_connect(move |conn, _meta| {
                let sql = set_search_path.clone();
                Box::pin(async move {
                    conn.execute(sql.as_str()).await?;
                    Ok(())
                })
            });
        }

        let pool = pool_options.connect_lazy_with(options);

        let previous = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pool);
        if previous.is_some() {
            warn!(
                display_name = %self.display_name,
                "Replacing existing pool without draining it"
            );
        }

        info!(
            display_name = %self.display_name,
            db_type = ?db_type,
            pool_size = settings.pool_size,
            max_overflow = settings.max_overflow,
            pre_ping = settings.pre_ping,
            "Database pool configured"
        );
        Ok(())
    }

    /// Session factory for the current pool.
    pub fn session_factory(&self) -> DbResult<SessionFactory> {
        let pool = self.pool.read().unwrap_or_else(PoisonError::into_inner);
        match pool.as_ref() {
            Some(pool) => Ok(SessionFactory {
                pool: pool.clone(),
                display_name: Arc::clone(&self.display_name),
            }),
            None => Err(DbError::unavailable(format!(
                "The {} database",
                self.display_name
            ))),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Close the pool. Waits for checked-out sessions to come back, then
    /// closes every idle connection.
    pub async fn disconnect(&self) {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match pool {
            Some(pool) => {
                info!(display_name = %self.display_name, "Disconnecting database pool");
                pool.close().await;
                info!(display_name = %self.display_name, "Database pool closed");
            }
            None => debug!(display_name = %self.display_name, "Database pool was not connected"),
        }
    }

    fn connect_options(&self, db_type: Option<DatabaseType>) -> DbResult<AnyConnectOptions> {
        let settings = &self.settings;
        let invalid = || {
            DbError::invalid_input(format!(
                "The {} database URI could not be parsed",
                self.display_name
            ))
        };

        let mut url = Url::parse(settings.uri.expose_secret()).map_err(|_| invalid())?;
        if db_type == Some(DatabaseType::PostgreSQL) {
            url.query_pairs_mut()
                .append_pair("application_name", &settings.application_name);
        }

        let options = AnyConnectOptions::from_url(&url).map_err(|_| invalid())?;
        Ok(if settings.echo {
            options
        } else {
            options.disable_statement_logging()
        })
    }
}

/// `SET search_path` for a schema name, quoted as an identifier.
fn search_path_statement(schema: &str) -> String {
    format!("SET search_path TO \"{}\"", schema.replace('"', "\"\""))
}

/// Creates sessions on one pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    pool: AnyPool,
    display_name: Arc<str>,
}

impl SessionFactory {
    /// Begin a new session (one transaction).
    pub async fn session(&self) -> DbResult<Session> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| driver_error("begin session", e))?;
        debug!(display_name = %self.display_name, "Session opened");
        Ok(Session {
            tx,
            staged: Vec::new(),
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub(crate) fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

/// One transaction plus the statements staged for it.
///
/// Dropping a session without committing rolls it back.
pub struct Session {
    tx: Transaction<'static, Any>,
    staged: Vec<Statement>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("staged", &self.staged.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Stage a statement to run on the next flush or commit.
    pub fn add(&mut self, statement: Statement) {
        self.staged.push(statement);
    }

    /// Stage several statements in order.
    pub fn add_all<I>(&mut self, statements: I)
    where
        I: IntoIterator<Item = Statement>,
    {
        self.staged.extend(statements);
    }

    /// Number of statements waiting for a flush.
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    /// Run a statement now and return its rows.
    pub async fn execute(&mut self, statement: &Statement) -> DbResult<Vec<AnyRow>> {
        build_query(statement)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| driver_error("execute statement", e))
    }

    /// Run every staged statement in order.
    pub async fn flush(&mut self) -> DbResult<()> {
        let staged = std::mem::take(&mut self.staged);
        for statement in &staged {
            build_query(statement)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| driver_error("flush", e))?;
        }
        Ok(())
    }

    /// Flush, then commit the transaction.
    pub async fn commit(mut self) -> DbResult<()> {
        self.flush().await?;
        self.tx
            .commit()
            .await
            .map_err(|e| driver_error("commit", e))
    }

    /// Discard staged statements and roll the transaction back.
    pub async fn rollback(self) -> DbResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| driver_error("rollback", e))
    }
}
