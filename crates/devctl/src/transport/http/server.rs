//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use crate::routing::RouteTable;

use super::routes::{AppState, DEFAULT_MAX_BODY_BYTES, router};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// If true, ignore SIGTERM and wait for SIGINT.
    pub await_explicit_shutdown: bool,
    /// How long shutdown waits for dispatch workers to finish.
    pub shutdown_grace: Duration,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
            await_explicit_shutdown: false,
            shutdown_grace: Duration::from_secs(5),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Serve `table` until SIGINT or SIGTERM, then stop the dispatcher.
pub async fn serve(config: ServerConfig, table: &RouteTable, state: AppState) -> anyhow::Result<()> {
    let signal = shutdown_signal(config.await_explicit_shutdown);
    serve_with_shutdown(config, table, state, signal).await
}

pub async fn serve_with_shutdown<F>(
    config: ServerConfig,
    table: &RouteTable,
    state: AppState,
    signal: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, config, table, state, signal).await
}

/// Serve on an already bound listener.
pub async fn serve_listener<F>(
    listener: TcpListener,
    config: ServerConfig,
    table: &RouteTable,
    state: AppState,
    signal: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = state.with_max_body_bytes(config.max_body_bytes);
    let dispatcher = state.dispatcher.clone();
    let app = router(table, state);

    info!(
        addr = %listener.local_addr()?,
        routes = table.len(),
        workers = dispatcher.stats().total,
        "Starting devctl server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await?;

    info!("Server shutdown complete");

    let report = dispatcher.shutdown(config.shutdown_grace).await;
    if report.abandoned > 0 {
        tracing::warn!(
            abandoned = report.abandoned,
            "Dispatch workers still busy after shutdown grace"
        );
    }

    Ok(())
}

/// Wait for SIGINT, or SIGTERM unless `await_explicit_shutdown` is set.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed, which only happens when the
/// tokio runtime is misconfigured. That should fail fast at startup.
async fn shutdown_signal(await_explicit_shutdown: bool) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        if await_explicit_shutdown {
            tracing::info!("await_explicit_shutdown enabled, ignoring SIGTERM");
            std::future::pending::<()>().await
        } else {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect(
                    "failed to install SIGTERM handler - is tokio runtime configured correctly?",
                )
                .recv()
                .await;
        }
    };

    #[cfg(not(unix))]
    let terminate = {
        let _ = await_explicit_shutdown;
        std::future::pending::<()>()
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
