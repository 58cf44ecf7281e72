//! Price sources the polling feed fetches from

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::debug;

use livefeed_core::{scale_price, FeedError, FeedResult, HttpSourceConfig, PriceQuote, Symbol};

/// Base trait for polled price sources
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Validate the transport before a cycle. A failure here fails the
    /// whole cycle.
    async fn check(&self) -> FeedResult<()> {
        Ok(())
    }

    /// Fetch the latest price of one symbol
    async fn fetch_price(&self, symbol: &Symbol) -> FeedResult<PriceQuote>;
}

/// HTTP source issuing one `GET` per symbol
pub struct HttpPriceSource {
    config: HttpSourceConfig,
    client: Client,
}

impl HttpPriceSource {
    pub fn new(config: HttpSourceConfig, timeout: Duration) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::InvalidConfig(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn with_client(config: HttpSourceConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait::async_trait]
impl PriceSource for HttpPriceSource {
    fn name(&self) -> &str {
        &self.config.base_url
    }

    async fn fetch_price(&self, symbol: &Symbol) -> FeedResult<PriceQuote> {
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[(self.config.symbol_param.as_str(), symbol.as_str())])
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;

        if status != StatusCode::OK {
            return Err(FeedError::Http {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        debug!(%symbol, "price response received");
        parse_price_body(&body)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FeedError {
    if err.is_timeout() {
        FeedError::Timeout
    } else if err.is_connect() || err.is_request() {
        FeedError::Transport(err.to_string())
    } else if err.is_decode() || err.is_body() {
        FeedError::InvalidMessage(err.to_string())
    } else {
        FeedError::Transport(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceBody {
    #[serde(deserialize_with = "number_or_string")]
    price: f64,
    #[serde(default)]
    expo: Option<i32>,
    #[serde(default, rename = "change24h")]
    change_24h: Option<f64>,
    #[serde(default, rename = "changePercent24h")]
    change_percent_24h: Option<f64>,
}

fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Decode a single-price response body
pub fn parse_price_body(body: &str) -> FeedResult<PriceQuote> {
    let parsed: PriceBody = serde_json::from_str(body)?;

    let price = match parsed.expo {
        Some(expo) if parsed.price.fract() == 0.0 && parsed.price.abs() < i64::MAX as f64 => {
            scale_price(parsed.price as i64, expo)
        }
        Some(expo) => parsed.price * 10f64.powi(expo),
        None => parsed.price,
    };

    PriceQuote::new(price)
        .with_change(parsed.change_24h, parsed.change_percent_24h)
        .validated()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_price() {
        let quote = parse_price_body(r#"{"price": 64000.12}"#).unwrap();
        assert_eq!(quote.price, 64000.12);
        assert!(quote.change_24h.is_none());
    }

    #[test]
    fn test_parse_string_price_with_changes() {
        let quote = parse_price_body(
            r#"{"price": "64010.5", "change24h": -12.5, "changePercent24h": -0.02}"#,
        )
        .unwrap();
        assert_eq!(quote.price, 64010.5);
        assert_eq!(quote.change_24h, Some(-12.5));
        assert_eq!(quote.change_percent_24h, Some(-0.02));
    }

    #[test]
    fn test_parse_scaled_price() {
        let quote = parse_price_body(r#"{"price": "6400012", "expo": -2}"#).unwrap();
        assert!((quote.price - 64000.12).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_bad_bodies() {
        assert!(matches!(
            parse_price_body("not json"),
            Err(FeedError::InvalidMessage(_))
        ));
        assert!(matches!(
            parse_price_body(r#"{"price": -3}"#),
            Err(FeedError::InvalidPrice(_))
        ));
        assert!(matches!(
            parse_price_body(r#"{"price": "abc"}"#),
            Err(FeedError::InvalidMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = HttpPriceSource::new(
            HttpSourceConfig {
                base_url: format!("http://{addr}/price"),
                ..Default::default()
            },
            Duration::from_secs(2),
        )
        .unwrap();

        let err = source.fetch_price(&Symbol::from("BTC/USD")).await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err:?}");
    }
}
