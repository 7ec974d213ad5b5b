use super::types::{PricePoint, PriceQuote, RangeStats};

pub fn summarize(series: &[PricePoint]) -> Option<RangeStats> {
    if series.is_empty() {
        return None;
    }

    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;
    let mut sum = 0.0;
    for point in series {
        max = max.max(point.price);
        min = min.min(point.price);
        sum += point.price;
    }

    Some(RangeStats {
        max,
        min,
        mean: sum / series.len() as f64,
        samples: series.len(),
    })
}

// Asset units to quote currency, rounded to cents.
pub fn units_to_fiat(units: f64, quote: &PriceQuote) -> Option<f64> {
    if !units.is_finite() || quote.value <= 0.0 {
        return None;
    }
    Some(round_to(units * quote.value, 2))
}

// Quote currency to asset units, rounded to satoshis.
pub fn fiat_to_units(amount: f64, quote: &PriceQuote) -> Option<f64> {
    if !amount.is_finite() || quote.value <= 0.0 {
        return None;
    }
    Some(round_to(amount / quote.value, 8))
}

pub fn holdings_value(units: f64, future_price: f64) -> f64 {
    units * future_price
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
