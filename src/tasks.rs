//! Periodic background tasks.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Spawn `task` to run every `period`, starting one period from now.
///
/// `repeat == 0` runs forever. A failed run is logged and does not count
/// toward `repeat`.
pub fn spawn_repeated_task<F, Fut, E>(
    name: &'static str,
    period: Duration,
    repeat: u32,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        let mut completed = 0;
        tokio::time::sleep(period).await;
        while repeat == 0 || completed < repeat {
            match task().await {
                Ok(()) => {
                    if repeat != 0 {
                        completed += 1;
                    }
                    debug!(task = name, completed, "Repeated task executed successfully");
                }
                Err(e) => error!(task = name, error = %e, "Repeated task failed to run"),
            }
            tokio::time::sleep(period).await;
        }
        debug!(task = name, "Repeated task finished");
    })
}
