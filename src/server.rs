// SPDX-License-Identifier: MIT
//! HTTP host: router assembly, serving with graceful shutdown, and the top-level
//! supervisor that turns a failed run into a single fatal log line.
use crate::routes;
use crate::settings::ServerConfig;
use crate::state::AppState;
use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Build the application router with request tracing (and request metrics with the
/// `metrics` feature).
pub fn create_router(state: AppState) -> Router {
    let router = routes::routes();

    #[cfg(feature = "metrics")]
    let router = router.route_layer(axum::middleware::from_fn(
        crate::http_metrics::record_request_metrics,
    ));

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Bind the configured host and port. Host names are resolved.
///
/// # Errors
/// Returns an error if the host cannot be resolved or the port cannot be bound.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))
}

/// Bind the listener and serve until Ctrl+C or SIGTERM.
///
/// # Errors
/// Returns an error if binding fails or the server stops with an I/O error.
pub async fn run_server_with_config(config: ServerConfig, state: AppState) -> Result<()> {
    let listener = bind(&config).await?;
    let addr = listener.local_addr().context("listener has no local address")?;

    tracing::info!(%addr, "listening for connections");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated with an error")?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Await `run`; an error is logged once at fatal severity and swallowed. `finish`
/// always runs afterwards.
pub async fn supervise<F, S>(run: F, finish: S)
where
    F: Future<Output = Result<()>>,
    S: FnOnce(),
{
    if let Err(err) = run.await {
        tracing::error!(
            severity = "fatal",
            error = %format_args!("{err:#}"),
            "host terminated unexpectedly"
        );
    }
    finish();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
