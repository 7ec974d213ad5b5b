use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;

const ENV_PREFIX: &str = "STACK_YEARS_";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub asset_id: String,
    pub quote_currency: String,
    pub ticker_symbol: String,
    pub coingecko_base_url: String,
    pub binance_base_url: String,
    pub provider_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    pub market_chart_days: u32,
    // Price reported, flagged as estimated, when every provider fails.
    pub fallback_price: f64,
    pub listen_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            asset_id: "bitcoin".to_string(),
            quote_currency: "usd".to_string(),
            ticker_symbol: "BTCUSDT".to_string(),
            coingecko_base_url: "https://api.coingecko.com/api/v3".to_string(),
            binance_base_url: "https://api.binance.com".to_string(),
            provider_timeout_secs: 5,
            refresh_interval_secs: 60,
            market_chart_days: 1,
            fallback_price: 95_000.0,
            listen_port: 8080,
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {:?}", path);
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(v) = var("ASSET_ID") {
            self.asset_id = v;
        }
        if let Some(v) = var("QUOTE_CURRENCY") {
            self.quote_currency = v;
        }
        if let Some(v) = var("TICKER_SYMBOL") {
            self.ticker_symbol = v;
        }
        if let Some(v) = var("COINGECKO_BASE_URL") {
            self.coingecko_base_url = v;
        }
        if let Some(v) = var("BINANCE_BASE_URL") {
            self.binance_base_url = v;
        }
        if let Some(v) = var("PROVIDER_TIMEOUT_SECS") {
            self.provider_timeout_secs = parse_env("PROVIDER_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = var("REFRESH_INTERVAL_SECS") {
            self.refresh_interval_secs = parse_env("REFRESH_INTERVAL_SECS", v)?;
        }
        if let Some(v) = var("MARKET_CHART_DAYS") {
            self.market_chart_days = parse_env("MARKET_CHART_DAYS", v)?;
        }
        if let Some(v) = var("FALLBACK_PRICE") {
            self.fallback_price = parse_env("FALLBACK_PRICE", v)?;
        }
        if let Some(v) = var("LISTEN_PORT") {
            self.listen_port = parse_env("LISTEN_PORT", v)?;
        }
        debug!("Configuration after environment overrides: {:?}", self);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.asset_id.trim().is_empty() {
            return Err(ConfigError::Invalid("asset_id must not be empty".to_string()));
        }
        if self.quote_currency.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "quote_currency must not be empty".to_string(),
            ));
        }
        if self.provider_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "provider_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "refresh_interval_secs must be > 0".to_string(),
            ));
        }
        if self.market_chart_days == 0 {
            return Err(ConfigError::Invalid(
                "market_chart_days must be > 0".to_string(),
            ));
        }
        if !self.fallback_price.is_finite() || self.fallback_price <= 0.0 {
            return Err(ConfigError::Invalid(
                "fallback_price must be a positive number".to_string(),
            ));
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Env { key, value })
}
