//! Periodic sweep that fails runs whose owning node went silent.
//!
//! Disabled unless `RUN_REAPER_ENABLED=true`. Without it a run held by a
//! dead node stays `running` until an operator cancels it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RunReaperConfig;
use crate::engine::DispatchEngine;

/// Run the reaper loop until `cancel` is triggered.
pub async fn run(engine: Arc<DispatchEngine>, config: RunReaperConfig, cancel: CancellationToken) {
    let grace = chrono::Duration::seconds(config.grace_secs);

    tracing::info!(
        grace_secs = config.grace_secs,
        interval_secs = config.interval_secs,
        "Run reaper started"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Run reaper stopping");
                break;
            }
            _ = interval.tick() => {
                match engine.reap_stale_runs(grace).await {
                    Ok(failed) if !failed.is_empty() => {
                        tracing::info!(failed = failed.len(), "Run reaper: failed stale runs");
                    }
                    Ok(_) => tracing::debug!("Run reaper: nothing to reap"),
                    Err(e) => tracing::error!(error = %e, "Run reaper: sweep failed"),
                }
            }
        }
    }
}
