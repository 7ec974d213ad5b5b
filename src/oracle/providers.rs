use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::PriceProvider;
use crate::config::AppConfig;
use crate::core::PriceSource;
use crate::error::ProviderError;

pub struct CoinGeckoSimpleProvider {
    client: Client,
    base_url: String,
    asset_id: String,
    currency: String,
}

impl CoinGeckoSimpleProvider {
    pub fn new(client: Client, config: &AppConfig) -> Self {
        Self {
            client,
            base_url: config.coingecko_base_url.clone(),
            asset_id: config.asset_id.clone(),
            currency: config.quote_currency.clone(),
        }
    }
}

#[async_trait]
impl PriceProvider for CoinGeckoSimpleProvider {
    fn source(&self) -> PriceSource {
        PriceSource::CoinGeckoSimple
    }

    async fn fetch_price(&self) -> Result<f64, ProviderError> {
        let url = format!("{}/simple/price", self.base_url);
        debug!("Requesting {url} for {}/{}", self.asset_id, self.currency);
        let body = get_json(
            self.client.get(&url).query(&[
                ("ids", self.asset_id.as_str()),
                ("vs_currencies", self.currency.as_str()),
            ]),
        )
        .await?;
        parse_simple_price(&body, &self.asset_id, &self.currency)
    }
}

pub struct CoinGeckoMarketChartProvider {
    client: Client,
    base_url: String,
    asset_id: String,
    currency: String,
    days: u32,
}

impl CoinGeckoMarketChartProvider {
    pub fn new(client: Client, config: &AppConfig) -> Self {
        Self {
            client,
            base_url: config.coingecko_base_url.clone(),
            asset_id: config.asset_id.clone(),
            currency: config.quote_currency.clone(),
            days: config.market_chart_days,
        }
    }
}

#[async_trait]
impl PriceProvider for CoinGeckoMarketChartProvider {
    fn source(&self) -> PriceSource {
        PriceSource::CoinGeckoMarketChart
    }

    async fn fetch_price(&self) -> Result<f64, ProviderError> {
        let url = format!("{}/coins/{}/market_chart", self.base_url, self.asset_id);
        debug!("Requesting {url} over {} day(s)", self.days);
        let days = self.days.to_string();
        let body = get_json(self.client.get(&url).query(&[
            ("vs_currency", self.currency.as_str()),
            ("days", days.as_str()),
        ]))
        .await?;
        parse_market_chart_latest(&body)
    }
}

pub struct BinanceTickerProvider {
    client: Client,
    base_url: String,
    symbol: String,
}

impl BinanceTickerProvider {
    pub fn new(client: Client, config: &AppConfig) -> Self {
        Self {
            client,
            base_url: config.binance_base_url.clone(),
            symbol: config.ticker_symbol.clone(),
        }
    }
}

#[async_trait]
impl PriceProvider for BinanceTickerProvider {
    fn source(&self) -> PriceSource {
        PriceSource::BinanceTicker
    }

    async fn fetch_price(&self) -> Result<f64, ProviderError> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        debug!("Requesting {url} for {}", self.symbol);
        let body = get_json(
            self.client
                .get(&url)
                .query(&[("symbol", self.symbol.as_str())]),
        )
        .await?;
        parse_ticker_price(&body)
    }
}

async fn get_json(request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status(status.as_u16()));
    }
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))
}

// `{asset: {currency: price}}`
pub fn parse_simple_price(
    body: &Value,
    asset_id: &str,
    currency: &str,
) -> Result<f64, ProviderError> {
    let price = body
        .get(asset_id)
        .and_then(|by_currency| by_currency.get(currency))
        .ok_or(ProviderError::Empty)?;
    usable_price(price)
}

// `{prices: [[timestamp_ms, price], ...]}`, taking the latest timestamp.
pub fn parse_market_chart_latest(body: &Value) -> Result<f64, ProviderError> {
    let points = parse_price_series(body)?;
    let latest = points
        .into_iter()
        .max_by_key(|(timestamp, _)| *timestamp)
        .ok_or(ProviderError::Empty)?;
    positive(latest.1)
}

// `{price: "123.45"}`; numeric prices are accepted too.
pub fn parse_ticker_price(body: &Value) -> Result<f64, ProviderError> {
    let price = body.get("price").ok_or(ProviderError::Empty)?;
    usable_price(price)
}

pub(crate) fn parse_price_series(body: &Value) -> Result<Vec<(i64, f64)>, ProviderError> {
    let prices = body
        .get("prices")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Malformed("missing 'prices' array".to_string()))?;

    prices
        .iter()
        .map(|entry| {
            let pair = entry
                .as_array()
                .filter(|pair| pair.len() >= 2)
                .ok_or_else(|| ProviderError::Malformed(format!("bad price entry {entry}")))?;
            let timestamp = pair[0]
                .as_f64()
                .ok_or_else(|| ProviderError::Malformed(format!("bad timestamp {}", pair[0])))?;
            let price = pair[1]
                .as_f64()
                .ok_or_else(|| ProviderError::Malformed(format!("bad price {}", pair[1])))?;
            Ok((timestamp as i64, price))
        })
        .collect()
}

fn usable_price(value: &Value) -> Result<f64, ProviderError> {
    let price = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ProviderError::Malformed(format!("non-numeric price {value}")))?;
    positive(price)
}

fn positive(price: f64) -> Result<f64, ProviderError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(ProviderError::Empty)
    }
}
