use anyhow::Context;
use clap::Parser;
use fleet_orchestrator::{http, metrics::Metrics, Config, FleetEngine};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::parse();
    let fleet_config = config.fleet_config()?;
    tracing::info!(config = ?config, "Loaded configuration");

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let metrics = Arc::new(Metrics::new());

    // Spawn the transport session and the fleet engine
    let (fleet, engine_handle) = FleetEngine::spawn(fleet_config, metrics.clone(), shutdown_rx.clone());

    // Spawn the HTTP server (fleet API and metrics)
    let http_handle = {
        let router = http::router(fleet.clone(), &metrics);
        let addr = config.http_listen_addr;
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind HTTP listener on {addr}"))?;
            tracing::info!(%addr, "HTTP API listening");
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
                .context("HTTP server failed")?;
            Ok::<(), anyhow::Error>(())
        })
    };

    tracing::info!("All services started. Awaiting shutdown signal...");

    shutdown_signal().await;

    tracing::info!("Shutdown signal received. Terminating services...");
    // Dropping the sender wakes every receiver.
    drop(shutdown_tx);

    let (engine_res, http_res) = tokio::join!(engine_handle, http_handle);

    if let Err(e) = engine_res {
        tracing::error!(error = %e, "Fleet engine task failed.");
    }
    match http_res {
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed."),
        Err(e) => tracing::error!(error = %e, "HTTP server task failed."),
        Ok(Ok(())) => {}
    }

    tracing::info!("Fleet orchestrator shut down gracefully.");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
