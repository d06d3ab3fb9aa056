//! Tracing subscriber setup.

use crate::config::Settings;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Build the log filter: `RUST_LOG` wins, otherwise the configured level.
/// Statement logging from sqlx is let through only when echo is on.
pub fn env_filter(settings: &Settings) -> EnvFilter {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    if settings.db_echo {
        match "sqlx::query=debug".parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        }
    } else {
        filter
    }
}

/// Initialize the tracing subscriber for logging.
pub fn init_tracing(settings: &Settings) {
    let subscriber = tracing_subscriber::registry().with(env_filter(settings));

    if settings.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}
