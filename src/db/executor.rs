//! Query execution engine.
//!
//! [`QueryExecutor`] runs statements against a [`SessionFactory`]:
//! - row inserts (`add_row`, `add_rows`), committed all-or-nothing
//! - single and multi-row queries (`query_row`, `query_rows`)
//! - batched streaming (`stream_rows`)
//!
//! Every unit opens its own session and is re-run from scratch by the
//! [`RetryPolicy`] when it fails with a retryable error.

use crate::db::pool::{Session, SessionFactory};
use crate::db::result::{RowResult, RowResults};
use crate::db::stream::{RowStream, row_stream};
use crate::db::types::RowDecode;
use crate::error::DbResult;
use crate::models::{Entity, Statement};
use crate::retry::RetryPolicy;
use sqlx::any::AnyRow;
use std::time::Instant;
use tracing::{debug, warn};

/// Executes statements with retries.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    factory: SessionFactory,
    retry: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(factory: SessionFactory, retry: RetryPolicy) -> Self {
        Self { factory, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn session_factory(&self) -> &SessionFactory {
        &self.factory
    }

    /// Persist one entity.
    pub async fn add_row<E: Entity>(&self, row: &E) -> DbResult<()> {
        self.add_rows(std::slice::from_ref(row)).await
    }

    /// Persist several entities in one transaction. Either every row is
    /// committed or none is.
    pub async fn add_rows<E: Entity>(&self, rows: &[E]) -> DbResult<()> {
        self.retry
            .execute("add rows", move || async move {
                let mut session = self.factory.session().await?;
                session.add_all(rows.iter().map(Entity::insert_statement));
                self.commit_session(session).await
            })
            .await?;

        debug!(
            display_name = %self.factory.display_name(),
            rows = rows.len(),
            "Rows added"
        );
        Ok(())
    }

    /// Run a statement expected to produce at most one row.
    pub async fn query_row(
        &self,
        statement: &Statement,
        is_commit: bool,
        is_scalar: bool,
    ) -> DbResult<RowResult> {
        let rows = self
            .retry
            .execute("query row", || self.execute_query(statement, is_commit))
            .await?;
        Ok(RowResult::new(rows, is_scalar))
    }

    /// Run a statement and keep every row it produces.
    pub async fn query_rows(
        &self,
        statement: &Statement,
        is_commit: bool,
        is_scalar: bool,
    ) -> DbResult<RowResults> {
        let rows = self
            .retry
            .execute("query rows", || self.execute_query(statement, is_commit))
            .await?;
        Ok(RowResults::new(rows, is_scalar))
    }

    /// Stream the rows of `statement` in chunks of at most `batch` rows.
    ///
    /// Only the session checkout is retried; once the cursor runs, a failure
    /// ends the stream with one error item.
    pub fn stream_rows<T>(&self, statement: Statement, batch: usize, is_scalar: bool) -> RowStream<T>
    where
        T: RowDecode + Send + 'static,
    {
        row_stream(self.factory.clone(), self.retry, statement, batch, is_scalar)
    }

    /// Flush and commit a session.
    pub async fn commit_session(&self, session: Session) -> DbResult<()> {
        session.commit().await?;
        debug!(display_name = %self.factory.display_name(), "Session committed");
        Ok(())
    }

    /// One attempt: open a session, run the statement, then commit or roll back.
    pub(crate) async fn execute_query(
        &self,
        statement: &Statement,
        is_commit: bool,
    ) -> DbResult<Vec<AnyRow>> {
        let start = Instant::now();
        let mut session = self.factory.session().await?;
        let rows = session.execute(statement).await?;

        if is_commit {
            self.commit_session(session).await?;
        } else if let Err(e) = session.rollback().await {
            // Rows are already read; a failed rollback only loses the connection.
            warn!(
                display_name = %self.factory.display_name(),
                error = %e,
                "Failed to roll back read session"
            );
        }

        debug!(
            display_name = %self.factory.display_name(),
            rows = rows.len(),
            is_commit,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Statement executed"
        );
        Ok(rows)
    }
}
