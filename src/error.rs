use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("life expectancy ({life_expectancy}) must be greater than current age ({current_age})")]
    LifeExpectancyNotAfterCurrentAge {
        current_age: u32,
        life_expectancy: u32,
    },

    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },

    #[error("{field} must be > 0")]
    NotPositive { field: &'static str },

    #[error("{field} must be >= 0")]
    Negative { field: &'static str },

    #[error("{field} must be at most {max}, got {value}")]
    AgeAboveLimit {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("growth rate must be >= -100%, got {0}")]
    GrowthRateTooLow(f64),

    #[error("start date {start} is after end date {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },

    #[error("date {date} must be before today ({today})")]
    DateNotInPast { date: NaiveDate, today: NaiveDate },

    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate { value: String },
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("no usable price in response")]
    Empty,
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("rate limited by price provider, retry later")]
    RateLimited,

    #[error("price provider returned status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("no price data available for the requested dates")]
    NoData,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
