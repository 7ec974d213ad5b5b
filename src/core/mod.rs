mod market;
mod simulator;
mod types;

pub use market::{fiat_to_units, holdings_value, summarize, units_to_fiat};
pub use simulator::{
    MAX_AGE, WITHDRAWAL_RATE_HORIZON_YEARS, project, project_withdrawal_rate, projection_trace,
};
pub use types::{
    Phase, PricePoint, PriceQuote, PriceSource, RangeStats, RetirementParameters,
    RetirementProjection, WithdrawalRateParameters, WithdrawalRateProjection, YearTraceRow,
};
