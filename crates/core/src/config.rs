//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{FeedError, FeedResult, Symbol};

/// Polling feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub update_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub broadcast_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 1000,
            request_timeout_ms: 5000,
            broadcast_capacity: 1024,
        }
    }
}

impl FeedConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.update_interval_ms == 0 {
            return Err(FeedError::InvalidConfig(
                "update_interval_ms must be positive".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(FeedError::InvalidConfig(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.broadcast_capacity == 0 {
            return Err(FeedError::InvalidConfig(
                "broadcast_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP price endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSourceConfig {
    pub base_url: String,
    /// Query parameter carrying the symbol
    pub symbol_param: String,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api/price".to_string(),
            symbol_param: "symbol".to_string(),
        }
    }
}

/// Reconnecting socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub url: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: "wss://hermes.pyth.network/ws".to_string(),
            reconnect_delay_ms: 5000,
            max_reconnect_attempts: 10,
        }
    }
}

impl SocketConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.url.is_empty() {
            return Err(FeedError::InvalidConfig("socket url is empty".to_string()));
        }
        Ok(())
    }
}

/// How the host obtains prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    #[default]
    Poll,
    Stream,
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub mode: FeedMode,
    pub symbols: Vec<String>,
    pub feed: FeedConfig,
    pub http: HttpSourceConfig,
    pub socket: SocketConfig,
    pub summary_interval_ms: Option<u64>,
}

impl AppConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(Symbol::from)
            .collect()
    }

    pub fn validate(&self) -> FeedResult<()> {
        self.feed.validate()?;
        if self.mode == FeedMode::Stream {
            self.socket.validate()?;
        }
        Ok(())
    }
}
