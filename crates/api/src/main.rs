use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forge_api::background;
use forge_api::config::{ServerConfig, StoreBackend};
use forge_api::engine::DispatchEngine;
use forge_api::router::build_app_router;
use forge_api::state::AppState;
use forge_db::store::{DispatchStore, MemoryDispatchStore, PgDispatchStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_api=debug,forge_db=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        stale_threshold_secs = config.dispatch.stale_threshold_secs,
        "Loaded server configuration"
    );

    // --- Store ---
    let store: Arc<dyn DispatchStore> = match config.dispatch.store_backend {
        StoreBackend::Postgres => {
            let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

            let pool = forge_db::create_pool(&database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            forge_db::health_check(&pool)
                .await
                .expect("Database health check failed");

            forge_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Arc::new(PgDispatchStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; all state is lost on restart");
            Arc::new(MemoryDispatchStore::new())
        }
    };

    let engine = Arc::new(DispatchEngine::new(store, config.dispatch.stale_threshold()));

    // --- Background tasks ---
    let cancel = CancellationToken::new();
    let reaper_handle = config.dispatch.reaper.enabled.then(|| {
        tokio::spawn(background::run_reaper::run(
            Arc::clone(&engine),
            config.dispatch.reaper.clone(),
            cancel.clone(),
        ))
    });

    // --- App state ---
    let state = AppState {
        engine,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    if let Some(handle) = reaper_handle {
        let _ =
            tokio::time::timeout(Duration::from_secs(config.shutdown_timeout_secs), handle).await;
        tracing::info!("Run reaper stopped");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
