use chrono::{NaiveDate, NaiveTime, TimeDelta};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::core::{PricePoint, RangeStats, summarize};
use crate::error::{HistoryError, ValidationError};
use crate::oracle::parse_price_series;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub stats: RangeStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayPrice {
    pub date: NaiveDate,
    pub price: f64,
}

pub struct HistoryClient {
    client: Client,
    base_url: String,
    asset_id: String,
    currency: String,
}

impl HistoryClient {
    pub fn new(client: Client, config: &AppConfig) -> Self {
        Self {
            client,
            base_url: config.coingecko_base_url.clone(),
            asset_id: config.asset_id.clone(),
            currency: config.quote_currency.clone(),
        }
    }

    // Max/min/mean between `start` and `end`, both days inclusive.
    pub async fn fetch_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RangeReport, HistoryError> {
        let (from, to) = range_bounds(start, end)?;
        let url = format!(
            "{}/coins/{}/market_chart/range",
            self.base_url, self.asset_id
        );
        debug!("Requesting {url} from {from} to {to}");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("vs_currency", self.currency.clone()),
                ("from", from.to_string()),
                ("to", to.to_string()),
            ])
            .send()
            .await?;
        check_status(response.status())?;
        let body: Value = parse_body(&response.text().await?)?;

        let series: Vec<PricePoint> = parse_price_series(&body)
            .map_err(|e| HistoryError::Malformed(e.to_string()))?
            .into_iter()
            .map(|(timestamp_ms, price)| PricePoint {
                timestamp_ms,
                price,
            })
            .collect();
        let stats = summarize(&series).ok_or(HistoryError::NoData)?;
        info!(%start, %end, samples = stats.samples, "Fetched historical range");

        Ok(RangeReport { start, end, stats })
    }

    pub async fn fetch_day(
        &self,
        date: NaiveDate,
        today: NaiveDate,
    ) -> Result<DayPrice, HistoryError> {
        if date >= today {
            return Err(ValidationError::DateNotInPast { date, today }.into());
        }
        let url = format!("{}/coins/{}/history", self.base_url, self.asset_id);
        let formatted = date.format("%d-%m-%Y").to_string();
        debug!("Requesting {url} for {formatted}");

        let response = self
            .client
            .get(&url)
            .query(&[("date", formatted.as_str()), ("localization", "false")])
            .send()
            .await?;
        check_status(response.status())?;
        let body = parse_body(&response.text().await?)?;
        let price = parse_day_price(&body, &self.currency)?;

        Ok(DayPrice { date, price })
    }
}

// UNIX-second bounds covering `start` 00:00:00 through `end` 23:59:59 UTC.
pub fn range_bounds(start: NaiveDate, end: NaiveDate) -> Result<(i64, i64), ValidationError> {
    if start > end {
        return Err(ValidationError::InvertedDateRange { start, end });
    }
    let from = start.and_time(NaiveTime::MIN).and_utc().timestamp();
    let to = (end.and_time(NaiveTime::MIN) + TimeDelta::seconds(86_399))
        .and_utc()
        .timestamp();
    Ok((from, to))
}

pub fn parse_date(value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate {
        value: value.to_string(),
    })
}

// `{market_data: {current_price: {currency: price}}}`
pub fn parse_day_price(body: &Value, currency: &str) -> Result<f64, HistoryError> {
    body.get("market_data")
        .and_then(|data| data.get("current_price"))
        .and_then(|prices| prices.get(currency))
        .and_then(Value::as_f64)
        .filter(|price| price.is_finite() && *price > 0.0)
        .ok_or(HistoryError::NoData)
}

fn check_status(status: StatusCode) -> Result<(), HistoryError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("Historical price request was rate limited");
        return Err(HistoryError::RateLimited);
    }
    if !status.is_success() {
        return Err(HistoryError::Status(status.as_u16()));
    }
    Ok(())
}

fn parse_body(text: &str) -> Result<Value, HistoryError> {
    serde_json::from_str(text).map_err(|e| HistoryError::Malformed(e.to_string()))
}
