//! Layered configuration: optional TOML file, then `LIVEFEED__*` env vars

use config::{Config, Environment, File, FileFormat};

use livefeed_core::AppConfig;

pub const ENV_PREFIX: &str = "LIVEFEED";
pub const DEFAULT_CONFIG_FILE: &str = "livefeed";

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("symbols")
}

/// Load configuration from `path` (required when given, otherwise an
/// optional `livefeed.toml`) overlaid with environment variables.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let config: AppConfig = Config::builder()
        .add_source(file)
        .add_source(environment())
        .build()?
        .try_deserialize()?;

    config.validate()?;
    Ok(config)
}

/// Parse a TOML document without consulting the environment
pub fn from_toml(text: &str) -> anyhow::Result<AppConfig> {
    let config: AppConfig = Config::builder()
        .add_source(File::from_str(text, FileFormat::Toml))
        .build()?
        .try_deserialize()?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use livefeed_core::{FeedMode, Symbol};

    #[test]
    fn test_toml_overrides_defaults() {
        let config = from_toml(
            r#"
            mode = "poll"
            symbols = ["BTC/USD", "ETH/USD"]

            [feed]
            update_interval_ms = 2000

            [http]
            base_url = "https://prices.example.com/v1/price"
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, FeedMode::Poll);
        assert_eq!(
            config.symbols(),
            vec![Symbol::from("BTC/USD"), Symbol::from("ETH/USD")]
        );
        assert_eq!(config.feed.update_interval_ms, 2000);
        assert_eq!(config.feed.request_timeout_ms, 5000);
        assert_eq!(config.http.base_url, "https://prices.example.com/v1/price");
        assert_eq!(config.socket.max_reconnect_attempts, 10);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = from_toml(
            r#"
            [feed]
            update_interval_ms = 0
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("update_interval_ms"));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(load(Some("/nonexistent/livefeed-config")).is_err());
    }
}
