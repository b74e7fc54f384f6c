//! # Warwatch Notification Server
//!
//! Watches the remote map page and pushes a text notification to every
//! authenticated WebSocket subscriber whenever a location becomes flagged.
//!
//! ## Startup
//! 1. Load `.env` and resolve configuration. A missing `WS_AUTH_TOKEN` is
//!    fatal.
//! 2. Install logging (JSON file, plus console outside production).
//! 3. Build the registry, dispatcher, map source and cycle controller.
//! 4. Start the poll scheduler and the WebSocket gateway.
//!
//! ## Shutdown (SIGINT / SIGTERM)
//! 1. Stop the scheduler and refuse new connections.
//! 2. Wait for an in-flight cycle to finish.
//! 3. Close every connection with `1001` and wait for the sessions, bounded by
//!    the grace period.
//! 4. Stop the listener and exit.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::net::TcpListener;
use tokio::signal;

use lib_common::configs::AppConfig;
use lib_common::core::{ClientRegistry, CycleController, Dispatcher, RateLimiter};
use lib_common::gateway::{GatewayState, HttpQuota, serve};
use lib_common::ingestors::{MapPageSource, PollScheduler};
use lib_common::loggers::{LoggerOptions, init_logging};
use lib_common::retrieve::ClientOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    let _log_guard = init_logging(&LoggerOptions {
        log_dir: config.log_dir.clone(),
        file_name: config.log_file.clone(),
        level: config.log_level.clone(),
        console: !config.is_production(),
    })
    .context("Failed to initialize logging")?;

    tracing::info!("Starting warwatch: {}", config);

    let limiter = RateLimiter::new(config.rate_limit_window, config.rate_limit_max_messages);
    let registry = Arc::new(ClientRegistry::new(config.auth_token.clone(), limiter));
    let dispatcher = Dispatcher::new(registry.clone());

    let source = MapPageSource::new(
        &config.map_url,
        &ClientOptions {
            timeout: config.fetch_timeout,
            max_retries: config.fetch_retries,
            ..Default::default()
        },
    )
    .context("Invalid map URL")?;
    let controller = Arc::new(CycleController::new(source, dispatcher));

    let scheduler = PollScheduler::start(controller.clone(), &config.poll_schedule)
        .await
        .map_err(|e| anyhow!("Failed to start poll scheduler: {}", e))?;

    let http_requests = u32::try_from(config.rate_limit_max_messages).unwrap_or(u32::MAX);
    let http_quota = HttpQuota::new(config.rate_limit_window, http_requests).context("Invalid HTTP quota")?;
    let gateway = GatewayState::new(registry.clone(), http_quota);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("WebSocket server running on ws://localhost:{}", config.port);

    let server = tokio::spawn(serve(listener, gateway.clone()));

    shutdown_signal().await;
    tracing::info!("Shutting down server...");

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Poll scheduler did not stop cleanly: {}", e);
    }
    registry.stop_accepting();
    controller.wait_idle().await;

    if !gateway.drain(config.shutdown_grace).await {
        tracing::warn!(
            remaining = gateway.active_sessions(),
            "Sessions still open after the grace period"
        );
    }

    gateway.shutdown_token().cancel();
    match server.await {
        Ok(Ok(())) => tracing::info!("HTTP server closed."),
        Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
        Err(e) => tracing::error!("HTTP server task failed: {}", e),
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}

/// Resolves on `CTRL+C`, or `SIGTERM` on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => tracing::info!("SIGTERM received, initiating shutdown."),
    }
}
