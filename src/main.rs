//! Forum topics service: binary entrypoint.
//! Loads configuration, starts the refresher, serves the HTTP API and shuts
//! both down cleanly on Ctrl+C / SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rfd_topics::config::Config;
use rfd_topics::metrics::Metrics;
use rfd_topics::provider::rfd::RfdProvider;
use rfd_topics::{router, AppContext};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("fatal: {e:#}");
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing()?;

    let config = Config::load().context("invalid configuration")?;
    let addr = config.listen_addr().context("invalid listen address")?;
    info!(
        %addr,
        source = %config.rfd_base_url,
        forum_id = config.rfd_forum_id,
        interval_secs = config.refresh_interval_secs,
        "configuration loaded"
    );

    let metrics = Metrics::init().context("installing prometheus recorder")?;
    let provider = RfdProvider::from_source(&config.rfd_source())
        .context("building upstream http client")?;

    let (ctx, refresher) = AppContext::build(config, Arc::new(provider));
    let app = router(ctx).merge(metrics.router());

    let refresher = refresher.spawn();
    let refresher_stopped = refresher.stopped();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown_signal() => info!("shutdown signal received"),
                () = refresher_stopped.cancelled() => {
                    warn!("refresher exited unexpectedly; shutting down");
                }
            }
        })
        .await
        .context("http server error")?;

    refresher.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rfd_topics=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    let res = if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    res.map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
