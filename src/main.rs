//! Cachekeep - monitoring server for the shared cache store
//!
//! Serves health, stats and admin endpoints over the same connection the
//! cache, rate limiter and idempotency store use.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cachekeep::config::StoreBackend;
use cachekeep::{create_router, spawn_cleanup_task, AppState, Config, ConnectionManager, MemoryStore};

/// Main entry point for the cachekeep server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the shared connection manager and application state
/// 4. Start the expiry sweeper when running on the in-memory store
/// 5. Serve the monitoring router on the configured port
/// 6. On SIGINT/SIGTERM, stop accepting requests and close the store connection
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cachekeep=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cachekeep");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        backend = ?config.backend,
        enabled = config.redis.enabled,
        cluster = config.redis.is_cluster(),
        port = config.server_port,
        "Configuration loaded"
    );

    let (state, sweeper) = match config.backend {
        StoreBackend::Redis => (AppState::from_config(&config), None),
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let sweeper = spawn_cleanup_task(Arc::clone(&store), config.cleanup_interval);
            let connection = Arc::new(ConnectionManager::with_handle(store));
            (AppState::new(connection, &config), Some(sweeper))
        }
    };
    let connection = Arc::clone(&state.connection);

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(sweeper))
    .await
    .context("Server error")?;

    connection.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the sweeper.
async fn shutdown_signal(sweeper: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
        warn!("Expiry sweep task aborted");
    }
}
