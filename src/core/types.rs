use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceSource {
    CoinGeckoSimple,
    CoinGeckoMarketChart,
    BinanceTicker,
    StaticEstimate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub value: f64,
    pub source: PriceSource,
    pub is_estimated: bool,
    pub fetched_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn live(value: f64, source: PriceSource) -> Self {
        Self {
            value,
            source,
            is_estimated: false,
            fetched_at: Utc::now(),
        }
    }

    pub fn estimated(value: f64) -> Self {
        Self {
            value,
            source: PriceSource::StaticEstimate,
            is_estimated: true,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetirementParameters {
    pub annual_expense: f64,
    pub current_age: u32,
    pub life_expectancy: u32,
    pub growth_rate_percent: f64,
    pub annual_contribution_units: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetirementProjection {
    pub feasible: bool,
    pub years_to_retirement: Option<u32>,
    pub retirement_age: Option<u32>,
    pub required_capital: Option<f64>,
    // `None` when the quote has no usable (positive) price.
    pub required_units_now: Option<f64>,
    pub price_used: f64,
    pub price_is_estimated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WithdrawalRateParameters {
    pub annual_expense: f64,
    pub current_age: u32,
    pub withdrawal_rate_percent: f64,
    pub growth_rate_percent: f64,
    pub annual_contribution_units: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRateProjection {
    pub required_capital: f64,
    pub required_units_now: Option<f64>,
    // `None` means the target was not reached within `horizon_years`.
    pub years_to_target: Option<u32>,
    pub target_age: Option<u32>,
    pub horizon_years: u32,
    pub price_used: f64,
    pub price_is_estimated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub timestamp_ms: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeStats {
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    pub samples: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Accumulation,
    Drawdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearTraceRow {
    pub age: u32,
    pub phase: Phase,
    pub units_moved: f64,
    pub end_units: f64,
    pub price: f64,
    pub end_value: f64,
}
