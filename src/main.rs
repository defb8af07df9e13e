//! ubertweets-ingest daemon entrypoint.
//! Polls geo-tagged tweets, prices each location with Uber estimates and
//! appends the merged records to the configured sink until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ubertweets_ingest::bootstrap::build_loop;
use ubertweets_ingest::config::load_config_default;
use ubertweets_ingest::metrics::Metrics;

/// Compact logs by default; `INGEST_LOG_FORMAT=json` for structured output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ubertweets_ingest=info,warn"));

    let json = std::env::var("INGEST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let mut cfg = load_config_default().context("loading ingest config")?;
    cfg.resolve_credentials()?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    if let Some(addr) = cfg.metrics_addr.clone() {
        let metrics = Metrics::init()?;
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(&addr, token).await {
                error!(error = ?e, "metrics endpoint stopped");
            }
        });
    }

    let pipeline = build_loop(&cfg).await?;
    let cursor = pipeline.run(shutdown).await;

    info!(since_id = cursor.min_unseen_id(), "ingest daemon exiting");
    Ok(())
}
