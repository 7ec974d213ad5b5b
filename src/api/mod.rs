use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::AppConfig;
use crate::core::{
    PriceQuote, RetirementParameters, RetirementProjection, WithdrawalRateParameters,
    WithdrawalRateProjection, YearTraceRow, fiat_to_units, holdings_value, project,
    project_withdrawal_rate, projection_trace, units_to_fiat,
};
use crate::error::{HistoryError, ValidationError};
use crate::history::{HistoryClient, parse_date};
use crate::oracle::{PriceOracle, QuoteCache};

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ProjectionArgs {
    #[arg(long, help = "Annual expense to sustain, in quote currency")]
    pub annual_expense: f64,
    #[arg(long)]
    pub current_age: u32,
    #[arg(long, default_value_t = 90, help = "Age to fund through")]
    pub life_expectancy: u32,
    #[arg(
        long,
        default_value_t = 8.0,
        help = "Expected annual price growth in percent, may be negative"
    )]
    pub growth_rate: f64,
    #[arg(long, default_value_t = 0.0, help = "Units bought each year while working")]
    pub annual_contribution: f64,
}

impl From<&ProjectionArgs> for RetirementParameters {
    fn from(args: &ProjectionArgs) -> Self {
        RetirementParameters {
            annual_expense: args.annual_expense,
            current_age: args.current_age,
            life_expectancy: args.life_expectancy,
            growth_rate_percent: args.growth_rate,
            annual_contribution_units: args.annual_contribution,
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct WithdrawalRateArgs {
    #[arg(long, help = "Annual expense to sustain, in quote currency")]
    pub annual_expense: f64,
    #[arg(long)]
    pub current_age: u32,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Safe withdrawal rate in percent of capital per year"
    )]
    pub withdrawal_rate: f64,
    #[arg(long, default_value_t = 8.0, help = "Expected annual price growth in percent")]
    pub growth_rate: f64,
    #[arg(long, default_value_t = 0.0, help = "Units bought each year while working")]
    pub annual_contribution: f64,
}

impl From<&WithdrawalRateArgs> for WithdrawalRateParameters {
    fn from(args: &WithdrawalRateArgs) -> Self {
        WithdrawalRateParameters {
            annual_expense: args.annual_expense,
            current_age: args.current_age,
            withdrawal_rate_percent: args.withdrawal_rate,
            growth_rate_percent: args.growth_rate,
            annual_contribution_units: args.annual_contribution,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectionPayload {
    annual_expense: Option<f64>,
    current_age: Option<u32>,
    life_expectancy: Option<u32>,
    growth_rate: Option<f64>,
    annual_contribution: Option<f64>,
    include_trace: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WithdrawalRatePayload {
    annual_expense: Option<f64>,
    current_age: Option<u32>,
    withdrawal_rate: Option<f64>,
    growth_rate: Option<f64>,
    annual_contribution: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RangeQuery {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DayQuery {
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConvertQuery {
    btc: Option<f64>,
    fiat: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HoldingsQuery {
    units: Option<f64>,
    future_price: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResponse {
    pub quote: PriceQuote,
    pub projection: RetirementProjection,
    pub trace: Vec<YearTraceRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalRateResponse {
    quote: PriceQuote,
    projection: WithdrawalRateProjection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConvertResponse {
    quote: PriceQuote,
    units: Option<f64>,
    fiat: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HoldingsResponse {
    units: f64,
    future_price: f64,
    value: f64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
pub struct AppState {
    oracle: Arc<PriceOracle>,
    history: Arc<HistoryClient>,
}

impl AppState {
    pub fn new(oracle: Arc<PriceOracle>, history: Arc<HistoryClient>) -> Self {
        Self { oracle, history }
    }

    pub async fn current_quote(&self) -> PriceQuote {
        match self.oracle.cache().snapshot() {
            Some(quote) => quote,
            None => self.oracle.resolve_current_price().await,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/price", get(price_handler))
        .route("/api/price/refresh", post(refresh_handler))
        .route(
            "/api/projection",
            get(projection_get_handler).post(projection_post_handler),
        )
        .route(
            "/api/projection/withdrawal-rate",
            get(withdrawal_rate_get_handler).post(withdrawal_rate_post_handler),
        )
        .route("/api/history", get(history_range_handler))
        .route("/api/history/day", get(history_day_handler))
        .route("/api/convert", get(convert_handler))
        .route("/api/holdings", get(holdings_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(config: &AppConfig, port: u16) -> anyhow::Result<()> {
    let oracle = Arc::new(PriceOracle::from_config(config, QuoteCache::new())?);
    let history = Arc::new(HistoryClient::new(reqwest::Client::new(), config));
    let refresh = Arc::clone(&oracle).spawn_refresh(config.refresh_interval());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(AppState::new(oracle, history));
    let listener = TcpListener::bind(addr).await?;
    info!("stack-years HTTP API listening on http://{addr}");

    let served = axum::serve(listener, app).await;
    refresh.abort();
    Ok(served?)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn price_handler(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, state.current_quote().await)
}

async fn refresh_handler(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, state.oracle.resolve_with_diagnostics().await)
}

async fn projection_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<ProjectionPayload>,
) -> Response {
    projection_handler_impl(state, payload).await
}

async fn projection_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<ProjectionPayload>,
) -> Response {
    projection_handler_impl(state, payload).await
}

async fn projection_handler_impl(state: AppState, payload: ProjectionPayload) -> Response {
    let include_trace = payload.include_trace.unwrap_or(false);
    let args = projection_args_from_payload(payload);
    let quote = state.current_quote().await;
    match build_projection_response(&args, quote, include_trace) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn withdrawal_rate_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<WithdrawalRatePayload>,
) -> Response {
    withdrawal_rate_handler_impl(state, payload).await
}

async fn withdrawal_rate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<WithdrawalRatePayload>,
) -> Response {
    withdrawal_rate_handler_impl(state, payload).await
}

async fn withdrawal_rate_handler_impl(state: AppState, payload: WithdrawalRatePayload) -> Response {
    let args = withdrawal_rate_args_from_payload(payload);
    let quote = state.current_quote().await;
    let params = WithdrawalRateParameters::from(&args);
    match project_withdrawal_rate(&params, &quote) {
        Ok(projection) => json_response(
            StatusCode::OK,
            WithdrawalRateResponse { quote, projection },
        ),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn history_range_handler(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let (start, end) = match required_range(&query) {
        Ok(range) => range,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    match state.history.fetch_range(start, end).await {
        Ok(report) => json_response(StatusCode::OK, report),
        Err(e) => history_error_response(e),
    }
}

async fn history_day_handler(
    State(state): State<AppState>,
    Query(query): Query<DayQuery>,
) -> Response {
    let date = match required_date(query.date.as_deref(), "date") {
        Ok(date) => date,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let today = Utc::now().date_naive();
    match state.history.fetch_day(date, today).await {
        Ok(day) => json_response(StatusCode::OK, day),
        Err(e) => history_error_response(e),
    }
}

async fn convert_handler(
    State(state): State<AppState>,
    Query(query): Query<ConvertQuery>,
) -> Response {
    let quote = match (query.btc, query.fiat) {
        (Some(_), Some(_)) => {
            return error_response(StatusCode::BAD_REQUEST, "only one of btc or fiat may be set");
        }
        (None, None) => {
            return error_response(StatusCode::BAD_REQUEST, "one of btc or fiat is required");
        }
        _ => state.current_quote().await,
    };
    let units = query.btc.or_else(|| query.fiat.and_then(|f| fiat_to_units(f, &quote)));
    let fiat = query.fiat.or_else(|| query.btc.and_then(|b| units_to_fiat(b, &quote)));
    json_response(StatusCode::OK, ConvertResponse { quote, units, fiat })
}

async fn holdings_handler(Query(query): Query<HoldingsQuery>) -> Response {
    let (Some(units), Some(future_price)) = (query.units, query.future_price) else {
        return error_response(StatusCode::BAD_REQUEST, "units and futurePrice are required");
    };
    json_response(
        StatusCode::OK,
        HoldingsResponse {
            units,
            future_price,
            value: holdings_value(units, future_price),
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn history_error_response(err: HistoryError) -> Response {
    let status = match &err {
        HistoryError::Validation(_) => StatusCode::BAD_REQUEST,
        HistoryError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        HistoryError::NoData => StatusCode::NOT_FOUND,
        HistoryError::Status(_) | HistoryError::Http(_) | HistoryError::Malformed(_) => {
            StatusCode::BAD_GATEWAY
        }
    };
    error_response(status, &err.to_string())
}

fn required_date(
    value: Option<&str>,
    field: &'static str,
) -> Result<NaiveDate, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => parse_date(v),
        _ => Err(ValidationError::Missing { field }),
    }
}

fn required_range(query: &RangeQuery) -> Result<(NaiveDate, NaiveDate), ValidationError> {
    let start = required_date(query.start.as_deref(), "start")?;
    let end = required_date(query.end.as_deref(), "end")?;
    Ok((start, end))
}

pub fn build_projection_response(
    args: &ProjectionArgs,
    quote: PriceQuote,
    include_trace: bool,
) -> Result<ProjectionResponse, ValidationError> {
    let params = RetirementParameters::from(args);
    let projection = project(&params, &quote)?;
    let trace = match projection.years_to_retirement {
        Some(years) if include_trace => projection_trace(&params, &quote, years)?,
        _ => Vec::new(),
    };
    Ok(ProjectionResponse {
        quote,
        projection,
        trace,
    })
}

fn projection_args_from_payload(payload: ProjectionPayload) -> ProjectionArgs {
    let mut args = default_projection_args();
    if let Some(v) = payload.annual_expense {
        args.annual_expense = v;
    }
    if let Some(v) = payload.current_age {
        args.current_age = v;
    }
    if let Some(v) = payload.life_expectancy {
        args.life_expectancy = v;
    }
    if let Some(v) = payload.growth_rate {
        args.growth_rate = v;
    }
    if let Some(v) = payload.annual_contribution {
        args.annual_contribution = v;
    }
    args
}

fn withdrawal_rate_args_from_payload(payload: WithdrawalRatePayload) -> WithdrawalRateArgs {
    let mut args = default_withdrawal_rate_args();
    if let Some(v) = payload.annual_expense {
        args.annual_expense = v;
    }
    if let Some(v) = payload.current_age {
        args.current_age = v;
    }
    if let Some(v) = payload.withdrawal_rate {
        args.withdrawal_rate = v;
    }
    if let Some(v) = payload.growth_rate {
        args.growth_rate = v;
    }
    if let Some(v) = payload.annual_contribution {
        args.annual_contribution = v;
    }
    args
}

fn default_projection_args() -> ProjectionArgs {
    ProjectionArgs {
        annual_expense: 40_000.0,
        current_age: 30,
        life_expectancy: 90,
        growth_rate: 8.0,
        annual_contribution: 0.5,
    }
}

fn default_withdrawal_rate_args() -> WithdrawalRateArgs {
    WithdrawalRateArgs {
        annual_expense: 40_000.0,
        current_age: 30,
        withdrawal_rate: 4.0,
        growth_rate: 8.0,
        annual_contribution: 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PriceSource;
    use crate::error::ProviderError;
    use crate::oracle::PriceProvider;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    struct FixedProvider(Option<f64>);

    #[async_trait]
    impl PriceProvider for FixedProvider {
        fn source(&self) -> PriceSource {
            PriceSource::CoinGeckoSimple
        }

        async fn fetch_price(&self) -> Result<f64, ProviderError> {
            self.0.ok_or(ProviderError::Status(500))
        }
    }

    fn test_state(price: Option<f64>) -> AppState {
        let oracle = PriceOracle::new(
            vec![Arc::new(FixedProvider(price))],
            Duration::from_secs(5),
            95_000.0,
            QuoteCache::new(),
        );
        // Validation failures must be reported before anything reaches this address.
        let config = AppConfig {
            coingecko_base_url: "http://127.0.0.1:9".to_string(),
            ..AppConfig::default()
        };
        let history = HistoryClient::new(reqwest::Client::new(), &config);
        AppState::new(Arc::new(oracle), Arc::new(history))
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state).oneshot(request).await.expect("infallible");
        let status = response.status();
        assert_eq!(
            response
                .headers()
                .get(header::CACHE_CONTROL)
                .and_then(|v| v.to_str().ok()),
            Some("no-store")
        );
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).expect("json body");
        (status, json)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).expect("request")
    }

    #[tokio::test]
    async fn projection_get_uses_defaults_and_live_price() {
        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request("/api/projection?includeTrace=true"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["quote"]["isEstimated"], Value::Bool(false));
        assert_eq!(body["projection"]["feasible"], Value::Bool(true));
        assert_eq!(body["projection"]["yearsToRetirement"], 10);
        assert_approx(
            body["projection"]["requiredCapital"].as_f64().expect("capital"),
            539_731.249_318_196_9,
        );
        assert_eq!(body["trace"].as_array().map(Vec::len), Some(60));
    }

    #[tokio::test]
    async fn projection_post_overrides_fields() {
        let request = Request::post("/api/projection")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"annualExpense":1000,"currentAge":30,"lifeExpectancy":35,"growthRate":0,"annualContribution":5}"#,
            ))
            .expect("request");
        let (status, body) = send(test_state(Some(100.0)), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["projection"]["yearsToRetirement"], 4);
        assert_eq!(body["projection"]["retirementAge"], 34);
        assert_eq!(body["trace"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn projection_rejects_life_expectancy_not_after_age() {
        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request("/api/projection?currentAge=70&lifeExpectancy=70"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["error"]
                .as_str()
                .expect("message")
                .contains("life expectancy")
        );
    }

    #[tokio::test]
    async fn projection_rejects_life_expectancy_above_age_limit() {
        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request(
                "/api/projection?currentAge=0&lifeExpectancy=4000000000&annualContribution=0",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["error"]
                .as_str()
                .expect("message")
                .contains("life_expectancy must be at most 150")
        );
    }

    #[tokio::test]
    async fn projection_with_failed_providers_is_marked_estimated() {
        let (status, body) = send(test_state(None), get_request("/api/projection")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["quote"]["isEstimated"], Value::Bool(true));
        assert_eq!(body["quote"]["source"], "static-estimate");
        assert_eq!(body["projection"]["priceIsEstimated"], Value::Bool(true));
    }

    #[tokio::test]
    async fn refresh_reports_provider_failures() {
        let request = Request::post("/api/price/refresh")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(test_state(None), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_approx(body["quote"]["value"].as_f64().expect("value"), 95_000.0);
        assert_eq!(body["failures"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn withdrawal_rate_rejects_zero_rate() {
        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request("/api/projection/withdrawal-rate?withdrawalRate=0"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["error"]
                .as_str()
                .expect("message")
                .contains("withdrawal_rate_percent")
        );
    }

    #[tokio::test]
    async fn withdrawal_rate_reports_years_to_target() {
        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request(
                "/api/projection/withdrawal-rate?withdrawalRate=4&growthRate=0&annualContribution=1",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["projection"]["yearsToTarget"], 20);
        assert_eq!(body["projection"]["horizonYears"], 100);
    }

    #[tokio::test]
    async fn history_rejects_inverted_range_without_fetching() {
        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request("/api/history?start=2024-03-01&end=2024-02-01"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("message").contains("after"));
    }

    #[tokio::test]
    async fn history_requires_both_dates() {
        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request("/api/history?start=2024-03-01"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "end is required");
    }

    #[tokio::test]
    async fn convert_both_directions() {
        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request("/api/convert?btc=0.5"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_approx(body["fiat"].as_f64().expect("fiat"), 25_000.0);

        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request("/api/convert?fiat=1000"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_approx(body["units"].as_f64().expect("units"), 0.02);
    }

    #[tokio::test]
    async fn convert_rejects_both_amounts() {
        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request("/api/convert?btc=0.5&fiat=1000"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("message").contains("only one"));
    }

    #[tokio::test]
    async fn holdings_value_endpoint() {
        let (status, body) = send(
            test_state(Some(50_000.0)),
            get_request("/api/holdings?units=2&futurePrice=150000"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_approx(body["value"].as_f64().expect("value"), 300_000.0);
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let (status, body) = send(test_state(Some(1.0)), get_request("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not found");
    }

    #[test]
    fn payload_overrides_only_present_fields() {
        let payload: ProjectionPayload =
            serde_json::from_str(r#"{"currentAge":45,"growthRate":-2.5}"#).expect("valid json");
        let args = projection_args_from_payload(payload);

        assert_eq!(args.current_age, 45);
        assert_approx(args.growth_rate, -2.5);
        assert_eq!(args.life_expectancy, default_projection_args().life_expectancy);
        assert_approx(args.annual_expense, default_projection_args().annual_expense);
    }
}
