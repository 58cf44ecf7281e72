//! Live price feed host
//!
//! Main entry point: runs the configured feed until Ctrl+C / SIGTERM

use std::env;
use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use livefeed_cli::{settings, RunningFeed};

const DEFAULT_SUMMARY_INTERVAL_MS: u64 = 30_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting livefeed v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = env::var("LIVEFEED_CONFIG").ok();
    let config = settings::load(config_path.as_deref())?;

    if config.symbols().is_empty() {
        warn!("No symbols configured, feed stays closed");
    }

    let feed = RunningFeed::start(&config)?;
    info!(mode = ?config.mode, symbols = config.symbols().len(), "Feed started");

    let summary_every = Duration::from_millis(
        config
            .summary_interval_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_SUMMARY_INTERVAL_MS),
    );
    let mut summary = tokio::time::interval(summary_every);
    // The first tick is immediate, nothing to report yet
    summary.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Press Ctrl+C to shutdown");
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = summary.tick() => feed.log_summary(),
        }
    }

    feed.stop();
    feed.log_summary();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}
