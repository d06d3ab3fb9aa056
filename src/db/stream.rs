//! Batched row streaming.
//!
//! [`RowStream`] pulls rows from a server-side cursor in chunks of at most
//! `batch` rows and yields each chunk decoded into the caller's type. It is
//! lazy (nothing happens until first polled), finite and not restartable.

use crate::db::params::build_query;
use crate::db::pool::{SessionFactory, driver_error};
use crate::db::types::RowDecode;
use crate::error::DbResult;
use crate::models::Statement;
use crate::retry::RetryPolicy;
use futures_util::{Stream, StreamExt};
use sqlx::Any;
use sqlx::any::AnyRow;
use sqlx::pool::PoolConnection;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};
use tracing::debug;

/// Progress of a [`RowStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// Not polled yet.
    Idle = 0,
    /// A connection has been checked out for the cursor.
    SessionOpen = 1,
    /// The cursor is running.
    StreamStarted = 2,
    /// Every row was delivered.
    Exhausted = 3,
    /// Stopped early: dropped by the consumer or the pool was shut down
    /// while the session was being acquired.
    Cancelled = 4,
    /// Ended with an error.
    Failed = 5,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::SessionOpen,
            2 => Self::StreamStarted,
            3 => Self::Exhausted,
            4 => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Cancelled | Self::Failed)
    }
}

/// Shared view of a stream's state that outlives the stream itself.
#[derive(Debug, Clone, Default)]
pub struct StreamProgress(Arc<AtomicU8>);

impl StreamProgress {
    pub fn get(&self) -> StreamState {
        StreamState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: StreamState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// A lazy sequence of decoded row chunks.
pub struct RowStream<T> {
    inner: Pin<Box<dyn Stream<Item = DbResult<Vec<T>>> + Send>>,
    state: StreamProgress,
}

impl<T> RowStream<T> {
    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    /// Handle for observing the state after the stream has been dropped.
    pub fn progress(&self) -> StreamProgress {
        self.state.clone()
    }
}

impl<T> std::fmt::Debug for RowStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T> Stream for RowStream<T> {
    type Item = DbResult<Vec<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> Drop for RowStream<T> {
    fn drop(&mut self) {
        let state = self.state.get();
        if !state.is_terminal() {
            debug!(state = ?state, "Row stream dropped before exhaustion");
            self.state.set(StreamState::Cancelled);
        }
    }
}

type RowCursor = Pin<Box<dyn Stream<Item = Result<AnyRow, sqlx::Error>> + Send>>;

/// A cursor whose first row has already been fetched.
struct OpenCursor {
    cursor: RowCursor,
    first: Option<AnyRow>,
}

/// Run `statement` on `conn`, keeping the connection checked out for as
/// long as the cursor lives.
fn row_cursor(mut conn: PoolConnection<Any>, statement: Statement) -> RowCursor {
    Box::pin(async_stream::stream! {
        let mut rows = build_query(&statement).fetch(&mut *conn);
        while let Some(row) = rows.next().await {
            yield row;
        }
    })
}

/// Check out a connection, execute the statement and fetch the first row.
///
/// Failing anywhere here releases the connection, so the whole step can be
/// retried. `Ok(None)` means the pool was closed underneath us (cooperative
/// shutdown).
async fn start_stream(
    factory: &SessionFactory,
    statement: &Statement,
    progress: &StreamProgress,
) -> DbResult<Option<OpenCursor>> {
    let conn = match factory.pool().acquire().await {
        Ok(conn) => conn,
        Err(sqlx::Error::PoolClosed) => {
            debug!(
                display_name = %factory.display_name(),
                "Pool closed while opening stream session"
            );
            return Ok(None);
        }
        Err(e) => return Err(driver_error("start stream", e)),
    };
    progress.set(StreamState::SessionOpen);

    let mut cursor = row_cursor(conn, statement.clone());
    let first = cursor
        .next()
        .await
        .transpose()
        .map_err(|e| driver_error("start stream", e))?;
    Ok(Some(OpenCursor { cursor, first }))
}

/// Build a stream of `batch`-sized chunks for `statement`.
///
/// A `batch` of 0 is treated as 1. Only opening the cursor is retried; once
/// rows have been handed out a failure ends the stream.
pub(crate) fn row_stream<T>(
    factory: SessionFactory,
    retry: RetryPolicy,
    statement: Statement,
    batch: usize,
    is_scalar: bool,
) -> RowStream<T>
where
    T: RowDecode + Send + 'static,
{
    let batch = batch.max(1);
    let state = StreamProgress::default();
    let progress = state.clone();

    let inner = async_stream::stream! {
        let started = retry
            .execute("start stream", || start_stream(&factory, &statement, &progress))
            .await;
        let OpenCursor { mut cursor, first } = match started {
            Ok(Some(open)) => open,
            Ok(None) => {
                progress.set(StreamState::Cancelled);
                return;
            }
            Err(e) => {
                progress.set(StreamState::Failed);
                yield Err(e);
                return;
            }
        };
        progress.set(StreamState::StreamStarted);

        let mut pending = first;
        loop {
            let mut chunk = Vec::with_capacity(batch);
            chunk.extend(pending.take());
            while chunk.len() < batch {
                match cursor.next().await {
                    Some(Ok(row)) => chunk.push(row),
                    None => break,
                    Some(Err(e)) => {
                        progress.set(StreamState::Failed);
                        yield Err(driver_error("stream rows", e));
                        return;
                    }
                }
            }

            if chunk.is_empty() {
                progress.set(StreamState::Exhausted);
                break;
            }

            let decoded = chunk
                .iter()
                .map(|row| T::decode(row, is_scalar))
                .collect::<DbResult<Vec<T>>>();
            match decoded {
                Ok(items) => yield Ok(items),
                Err(e) => {
                    progress.set(StreamState::Failed);
                    yield Err(e);
                    return;
                }
            }
        }
    };

    RowStream {
        inner: Box::pin(inner),
        state,
    }
}
