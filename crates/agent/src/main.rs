//! `forge-agent` -- reference dispatch node.
//!
//! Heartbeats, polls the dispatch API for work, runs the configured
//! executor command for each claimed request, streams its output into the
//! run log, and reports the outcome. See
//! [`AgentConfig::from_env`](forge_agent::config::AgentConfig::from_env)
//! for the environment variables.

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forge_agent::client::HttpDispatchClient;
use forge_agent::config::AgentConfig;
use forge_agent::executor::CommandExecutor;
use forge_agent::worker::Worker;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid agent configuration");
        std::process::exit(1);
    });

    let executor = CommandExecutor::new(&config.executor_command, config.task_timeout)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Invalid executor command");
            std::process::exit(1);
        });

    tracing::info!(
        api_url = %config.api_url,
        poll_interval_secs = config.poll_interval.as_secs(),
        executor = %config.executor_command.join(" "),
        "Starting forge-agent",
    );

    let worker = Worker::new(
        HttpDispatchClient::new(&config),
        executor,
        config.poll_interval,
        config.heartbeat_interval,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, stopping after the current cycle");
            signal_cancel.cancel();
        }
    });

    if let Err(e) = worker.run(cancel).await {
        tracing::error!(error = %e, "Worker stopped");
        std::process::exit(1);
    }
}
