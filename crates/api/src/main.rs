//! Calsync - appointment / Google Calendar synchronization service
//!
//! Main entry point for the HTTP server.

use std::sync::Arc;

use anyhow::Context;
use calsync_server::utils::logging::{init_tracing, LogFormat};
use calsync_server::{build_router, AppContext};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging FIRST so configuration problems are visible
    init_tracing(LogFormat::from_env());

    let config = calsync_infra::config::load().context("failed to load configuration")?;
    let bind_address = config.server.bind_address.clone();

    let context =
        Arc::new(AppContext::new(config).await.context("failed to initialise application")?);
    context.start_schedulers().await.context("failed to start schedulers")?;

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "calsync listening");

    let app = build_router(Arc::clone(&context));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(context.shutdown_token()))
        .await
        .context("http server failed")?;

    context.shutdown().await.context("shutdown failed")?;
    tracing::info!("calsync stopped");
    Ok(())
}

/// Resolves on Ctrl-C, SIGTERM or when the context is cancelled elsewhere.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Ctrl-C received"),
        () = terminate => tracing::info!("SIGTERM received"),
        () = cancel.cancelled() => {}
    }
    cancel.cancel();
}
