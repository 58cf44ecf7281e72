//! Core type definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::{FeedError, FeedResult};

/// Identifier of a tracked asset or pair, as understood by the price source.
///
/// Depending on the source this is a trading pair (`BTC/USD`) or an opaque
/// feed id (`0xe62d...`). The feed never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Health of the underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    #[default]
    Closed,
    Error,
}

impl ConnectionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closed => "closed",
            ConnectionStatus::Error => "error",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, ConnectionStatus::Closed)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A price as returned by a source, before it is stamped and merged
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub change_24h: Option<f64>,
    pub change_percent_24h: Option<f64>,
}

impl PriceQuote {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            change_24h: None,
            change_percent_24h: None,
        }
    }

    /// Build a quote from an integer mantissa and a decimal exponent
    /// (`price = mantissa * 10^expo`).
    pub fn from_scaled(mantissa: i64, expo: i32) -> FeedResult<Self> {
        Self::new(scale_price(mantissa, expo)).validated()
    }

    pub fn with_change(mut self, change_24h: Option<f64>, change_percent_24h: Option<f64>) -> Self {
        self.change_24h = change_24h;
        self.change_percent_24h = change_percent_24h;
        self
    }

    /// Reject negative, NaN and infinite prices
    pub fn validated(self) -> FeedResult<Self> {
        if self.price.is_finite() && self.price >= 0.0 {
            Ok(self)
        } else {
            Err(FeedError::InvalidPrice(self.price.to_string()))
        }
    }
}

/// Apply a decimal exponent to an integer mantissa
pub fn scale_price(mantissa: i64, expo: i32) -> f64 {
    mantissa as f64 * 10f64.powi(expo)
}

/// One observed price for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub symbol: Symbol,
    pub price: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(rename = "change24h", skip_serializing_if = "Option::is_none", default)]
    pub change_24h: Option<f64>,
    #[serde(rename = "changePercent24h", skip_serializing_if = "Option::is_none", default)]
    pub change_percent_24h: Option<f64>,
}

impl PriceUpdate {
    pub fn from_quote(symbol: Symbol, quote: PriceQuote, timestamp: i64) -> Self {
        Self {
            symbol,
            price: quote.price,
            timestamp,
            change_24h: quote.change_24h,
            change_percent_24h: quote.change_percent_24h,
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp).max(0)
    }
}

/// Read-only copy of a feed's state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedSnapshot {
    pub prices: HashMap<Symbol, PriceUpdate>,
    pub connection_status: ConnectionStatus,
    pub last_update: Option<PriceUpdate>,
    pub error: Option<String>,
}

impl FeedSnapshot {
    pub fn price(&self, symbol: &Symbol) -> Option<f64> {
        self.prices.get(symbol).map(|u| u.price)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scaled_quote() {
        let quote = PriceQuote::from_scaled(6_400_012, -2).unwrap();
        assert!((quote.price - 64000.12).abs() < 1e-9);

        let whole = PriceQuote::from_scaled(42, 0).unwrap();
        assert_eq!(whole.price, 42.0);
    }

    #[test]
    fn test_negative_price_rejected() {
        assert!(PriceQuote::from_scaled(-5, -1).is_err());
        assert!(PriceQuote::new(f64::NAN).validated().is_err());
        assert!(PriceQuote::new(f64::INFINITY).validated().is_err());
        assert!(PriceQuote::new(0.0).validated().is_ok());
    }

    #[test]
    fn test_update_serializes_optional_fields() {
        let update = PriceUpdate::from_quote(
            Symbol::from("BTC/USD"),
            PriceQuote::new(64000.12),
            1_700_000_000_000,
        );
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["symbol"], "BTC/USD");
        assert!(json.get("change24h").is_none());

        let with_change = PriceUpdate::from_quote(
            Symbol::from("BTC/USD"),
            PriceQuote::new(64000.12).with_change(Some(120.0), Some(0.19)),
            1_700_000_000_000,
        );
        let json = serde_json::to_value(&with_change).unwrap();
        assert_eq!(json["change24h"], 120.0);
        assert_eq!(json["changePercent24h"], 0.19);
    }

    #[test]
    fn test_status_default_is_closed() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Closed);
        assert!(!ConnectionStatus::Closed.is_active());
        assert!(ConnectionStatus::Error.is_active());
    }

    proptest! {
        #[test]
        fn scaled_non_negative_mantissa_is_valid(mantissa in 0i64..1_000_000_000_000, expo in -12i32..4) {
            let quote = PriceQuote::from_scaled(mantissa, expo).unwrap();
            prop_assert!(quote.price >= 0.0);
            prop_assert!(quote.price.is_finite());
        }
    }
}
