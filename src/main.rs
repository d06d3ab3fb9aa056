//! Resilient data-access layer - main entry point.
//!
//! Sets up the configured stores, keeps them alive until ctrl-c, then tears
//! them down.

use clap::Parser;
use resilient_data::DbResult;
use resilient_data::config::Settings;
use resilient_data::context::{RequestContext, new_correlation_id};
use resilient_data::models::Statement;
use resilient_data::state::AppState;
use resilient_data::tasks::spawn_repeated_task;
use resilient_data::telemetry::init_tracing;
use std::time::Duration;
use tracing::{debug, error, info};

/// How often the enabled stores are checked.
const HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let settings = Settings::parse();

    // Initialize logging
    init_tracing(&settings);

    info!(
        settings = %settings.safe_summary(),
        "Starting {} v{}",
        settings.project_name,
        env!("CARGO_PKG_VERSION")
    );

    let state = match AppState::setup(&settings) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to set up application state");
            return Err(e.into());
        }
    };

    let health = {
        let state = state.clone();
        spawn_repeated_task("health check", HEALTH_CHECK_PERIOD, 0, move || {
            let state = state.clone();
            async move {
                RequestContext::scope(Some(new_correlation_id()), health_check(&state)).await
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    health.abort();
    state.teardown().await;

    info!("Shutdown complete");
    Ok(())
}

/// Round-trip every enabled store once.
async fn health_check(state: &AppState) -> DbResult<()> {
    if let Ok(db) = state.db_manager() {
        let rows = db
            .row_operations()?
            .query_rows(&Statement::new("SELECT 1"), false, true)
            .await?;
        debug!(
            display_name = %db.display_name(),
            rows = rows.len(),
            "Database health check"
        );
    }
    if let Ok(cache) = state.cache_manager() {
        let reply: String = cache
            .connection()
            .pipeline_first(
                |pipe| {
                    pipe.cmd("PING");
                },
                false,
            )
            .await?;
        debug!(
            display_name = %cache.display_name(),
            reply = %reply,
            "Cache health check"
        );
    }
    Ok(())
}
