//! Builds the configured feed and reports on it

use std::sync::Arc;
use tracing::info;

use livefeed::{HttpPriceSource, LivePriceFeed, StreamingPriceFeed};
use livefeed_core::{now_ms, AppConfig, FeedMode, FeedSnapshot, PriceUpdate};

fn log_update(update: &PriceUpdate) {
    info!(
        symbol = %update.symbol,
        price = update.price,
        change_24h = ?update.change_24h,
        timestamp = update.timestamp,
        "price update"
    );
}

/// A started feed of either kind
pub enum RunningFeed {
    Poll(LivePriceFeed),
    Stream(StreamingPriceFeed),
}

impl RunningFeed {
    /// Build and start the feed described by `config`.
    /// Must be called from within a tokio runtime.
    pub fn start(config: &AppConfig) -> anyhow::Result<Self> {
        let symbols = config.symbols();

        match config.mode {
            FeedMode::Poll => {
                let source = HttpPriceSource::new(config.http.clone(), config.feed.request_timeout())?;
                let feed = LivePriceFeed::new(Arc::new(source), config.feed.clone())?
                    .with_listener(log_update);
                feed.start(symbols);
                Ok(RunningFeed::Poll(feed))
            }
            FeedMode::Stream => {
                let feed = StreamingPriceFeed::new(config.socket.clone(), config.feed.broadcast_capacity)?
                    .with_listener(log_update);
                feed.start(symbols)?;
                Ok(RunningFeed::Stream(feed))
            }
        }
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        match self {
            RunningFeed::Poll(feed) => feed.snapshot(),
            RunningFeed::Stream(feed) => feed.snapshot(),
        }
    }

    pub fn stop(&self) {
        match self {
            RunningFeed::Poll(feed) => feed.stop(),
            RunningFeed::Stream(feed) => feed.stop(),
        }
    }

    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        let last_update_age_ms = snapshot.last_update.as_ref().map(|u| u.age_ms(now_ms()));
        info!(
            status = %snapshot.connection_status,
            prices = snapshot.prices.len(),
            last_update_age_ms = ?last_update_age_ms,
            error = ?snapshot.error,
            "Feed state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livefeed_core::ConnectionStatus;

    #[tokio::test]
    async fn test_no_symbols_stays_closed() {
        let config = AppConfig::default();
        let feed = RunningFeed::start(&config).unwrap();

        assert!(matches!(feed, RunningFeed::Poll(_)));
        assert_eq!(feed.snapshot().connection_status, ConnectionStatus::Closed);
        feed.stop();
    }

    #[tokio::test]
    async fn test_stream_mode_builds_streaming_feed() {
        let config = AppConfig {
            mode: FeedMode::Stream,
            ..Default::default()
        };
        let feed = RunningFeed::start(&config).unwrap();

        assert!(matches!(feed, RunningFeed::Stream(_)));
        assert_eq!(feed.snapshot().connection_status, ConnectionStatus::Closed);
    }
}
