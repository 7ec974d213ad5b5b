use super::types::{
    Phase, PriceQuote, RetirementParameters, RetirementProjection, WithdrawalRateParameters,
    WithdrawalRateProjection, YearTraceRow,
};
use crate::error::ValidationError;

pub const WITHDRAWAL_RATE_HORIZON_YEARS: u32 = 100;

// Upper bound on any age accepted as input.
pub const MAX_AGE: u32 = 150;

#[derive(Debug, Clone, Copy)]
struct Accumulation {
    units: f64,
    price: f64,
}

impl Accumulation {
    fn start(price: f64) -> Self {
        Self { units: 0.0, price }
    }

    // Contribution lands first, then the price compounds.
    fn step(&mut self, contribution_units: f64, growth_factor: f64) {
        self.units += contribution_units;
        self.price *= growth_factor;
    }

    fn value(self) -> f64 {
        self.units * self.price
    }
}

fn growth_factor(growth_rate_percent: f64) -> f64 {
    1.0 + growth_rate_percent / 100.0
}

fn accumulate(
    start_price: f64,
    contribution_units: f64,
    growth_factor: f64,
    years: u32,
) -> Accumulation {
    let mut acc = Accumulation::start(start_price);
    for _ in 0..years {
        acc.step(contribution_units, growth_factor);
    }
    acc
}

fn drawdown_survives(
    start: Accumulation,
    annual_expense: f64,
    growth_factor: f64,
    years: u32,
) -> bool {
    let mut balance = start.units;
    let mut price = start.price;
    for _ in 0..years {
        balance -= annual_expense / price;
        if balance < 0.0 {
            return false;
        }
        price *= growth_factor;
    }
    true
}

fn units_at_price(amount: f64, quote: &PriceQuote) -> Option<f64> {
    (quote.value > 0.0).then(|| amount / quote.value)
}

// Every candidate from zero up to `life_expectancy - current_age` is
// simulated from scratch, year by year.
pub fn project(
    params: &RetirementParameters,
    quote: &PriceQuote,
) -> Result<RetirementProjection, ValidationError> {
    validate_parameters(params)?;
    validate_quote(quote)?;

    let factor = growth_factor(params.growth_rate_percent);
    let max_years = params.life_expectancy - params.current_age;

    for years_to_work in 0..=max_years {
        let at_retirement = accumulate(
            quote.value,
            params.annual_contribution_units,
            factor,
            years_to_work,
        );
        let drawdown_years = params.life_expectancy - (params.current_age + years_to_work);
        if !drawdown_survives(at_retirement, params.annual_expense, factor, drawdown_years) {
            continue;
        }

        let required_capital = at_retirement.value();
        return Ok(RetirementProjection {
            feasible: true,
            years_to_retirement: Some(years_to_work),
            retirement_age: Some(params.current_age + years_to_work),
            required_capital: Some(required_capital),
            required_units_now: units_at_price(required_capital, quote),
            price_used: quote.value,
            price_is_estimated: quote.is_estimated,
        });
    }

    Ok(RetirementProjection {
        feasible: false,
        years_to_retirement: None,
        retirement_age: None,
        required_capital: None,
        required_units_now: None,
        price_used: quote.value,
        price_is_estimated: quote.is_estimated,
    })
}

// Year-by-year path for one candidate accumulation length. The drawdown
// rows stop at the first year the balance goes negative.
pub fn projection_trace(
    params: &RetirementParameters,
    quote: &PriceQuote,
    years_to_work: u32,
) -> Result<Vec<YearTraceRow>, ValidationError> {
    validate_parameters(params)?;
    validate_quote(quote)?;

    let factor = growth_factor(params.growth_rate_percent);
    let years_to_work = years_to_work.min(params.life_expectancy - params.current_age);
    let mut rows = Vec::with_capacity((params.life_expectancy - params.current_age) as usize);

    let mut acc = Accumulation::start(quote.value);
    for year in 0..years_to_work {
        acc.step(params.annual_contribution_units, factor);
        rows.push(YearTraceRow {
            age: params.current_age + year,
            phase: Phase::Accumulation,
            units_moved: params.annual_contribution_units,
            end_units: acc.units,
            price: acc.price,
            end_value: acc.value(),
        });
    }

    let retirement_age = params.current_age + years_to_work;
    let mut balance = acc.units;
    let mut price = acc.price;
    for age in retirement_age..params.life_expectancy {
        let units_needed = params.annual_expense / price;
        balance -= units_needed;
        price *= factor;
        rows.push(YearTraceRow {
            age,
            phase: Phase::Drawdown,
            units_moved: units_needed,
            end_units: balance,
            price,
            end_value: balance * price,
        });
        if balance < 0.0 {
            break;
        }
    }

    Ok(rows)
}

// Fixed safe-withdrawal-rate model: the capital target is
// `annual_expense / rate`, and accumulation runs until the holding's value
// reaches it or the horizon is exhausted.
pub fn project_withdrawal_rate(
    params: &WithdrawalRateParameters,
    quote: &PriceQuote,
) -> Result<WithdrawalRateProjection, ValidationError> {
    validate_withdrawal_rate_parameters(params)?;
    validate_quote(quote)?;

    let required_capital = params.annual_expense / (params.withdrawal_rate_percent / 100.0);
    let factor = growth_factor(params.growth_rate_percent);

    let mut acc = Accumulation::start(quote.value);
    let mut years_to_target = None;
    for year in 0..=WITHDRAWAL_RATE_HORIZON_YEARS {
        if acc.value() >= required_capital {
            years_to_target = Some(year);
            break;
        }
        acc.step(params.annual_contribution_units, factor);
    }

    Ok(WithdrawalRateProjection {
        required_capital,
        required_units_now: units_at_price(required_capital, quote),
        years_to_target,
        target_age: years_to_target.map(|years| params.current_age + years),
        horizon_years: WITHDRAWAL_RATE_HORIZON_YEARS,
        price_used: quote.value,
        price_is_estimated: quote.is_estimated,
    })
}

fn validate_parameters(params: &RetirementParameters) -> Result<(), ValidationError> {
    if params.life_expectancy <= params.current_age {
        return Err(ValidationError::LifeExpectancyNotAfterCurrentAge {
            current_age: params.current_age,
            life_expectancy: params.life_expectancy,
        });
    }
    check_age("life_expectancy", params.life_expectancy)?;
    validate_common(
        params.annual_expense,
        params.growth_rate_percent,
        params.annual_contribution_units,
    )
}

fn validate_withdrawal_rate_parameters(
    params: &WithdrawalRateParameters,
) -> Result<(), ValidationError> {
    check_age("current_age", params.current_age)?;
    if !params.withdrawal_rate_percent.is_finite() {
        return Err(ValidationError::NonFinite {
            field: "withdrawal_rate_percent",
        });
    }
    if params.withdrawal_rate_percent <= 0.0 {
        return Err(ValidationError::NotPositive {
            field: "withdrawal_rate_percent",
        });
    }
    validate_common(
        params.annual_expense,
        params.growth_rate_percent,
        params.annual_contribution_units,
    )
}

fn check_age(field: &'static str, value: u32) -> Result<(), ValidationError> {
    if value > MAX_AGE {
        return Err(ValidationError::AgeAboveLimit {
            field,
            value,
            max: MAX_AGE,
        });
    }
    Ok(())
}

fn validate_common(
    annual_expense: f64,
    growth_rate_percent: f64,
    annual_contribution_units: f64,
) -> Result<(), ValidationError> {
    for (field, value) in [
        ("annual_expense", annual_expense),
        ("growth_rate_percent", growth_rate_percent),
        ("annual_contribution_units", annual_contribution_units),
    ] {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite { field });
        }
    }
    if annual_expense <= 0.0 {
        return Err(ValidationError::NotPositive {
            field: "annual_expense",
        });
    }
    if annual_contribution_units < 0.0 {
        return Err(ValidationError::Negative {
            field: "annual_contribution_units",
        });
    }
    if growth_rate_percent < -100.0 {
        return Err(ValidationError::GrowthRateTooLow(growth_rate_percent));
    }
    Ok(())
}

fn validate_quote(quote: &PriceQuote) -> Result<(), ValidationError> {
    if !quote.value.is_finite() {
        return Err(ValidationError::NonFinite { field: "price" });
    }
    Ok(())
}
