use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use stack_years::api::{self, ProjectionArgs, WithdrawalRateArgs, build_projection_response};
use stack_years::config::AppConfig;
use stack_years::core::{
    WithdrawalRateParameters, fiat_to_units, project_withdrawal_rate, units_to_fiat,
};
use stack_years::history::{HistoryClient, parse_date};
use stack_years::oracle::{PriceOracle, QuoteCache};

#[derive(Parser, Debug)]
#[command(
    name = "stack-years",
    about = "Years of BTC accumulation needed to fund a fixed annual expense for life"
)]
struct Cli {
    #[arg(long, global = true, help = "TOML configuration file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Serve the JSON API and refresh the price in the background")]
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    #[command(about = "Resolve the current price once")]
    Price,
    #[command(about = "Minimal accumulation years for a drawdown that lasts to life expectancy")]
    Project {
        #[command(flatten)]
        args: ProjectionArgs,
        #[arg(long, help = "Include the year-by-year path")]
        trace: bool,
        #[arg(long, help = "Re-project every time the price is refreshed")]
        follow: bool,
    },
    #[command(about = "Years until holdings reach expense / withdrawal rate")]
    WithdrawalRate {
        #[command(flatten)]
        args: WithdrawalRateArgs,
    },
    #[command(about = "Price statistics for a date range, or the price on one day")]
    History {
        #[arg(long, requires = "end", conflicts_with = "on")]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        on: Option<String>,
    },
    #[command(about = "Convert between BTC and the quote currency at the current price")]
    Convert {
        #[arg(long, conflicts_with = "fiat")]
        btc: Option<f64>,
        #[arg(long)]
        fiat: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Serve { port } => {
            api::run_http_server(&config, port.unwrap_or(config.listen_port)).await?;
        }
        Command::Price => {
            let oracle = PriceOracle::from_config(&config, QuoteCache::new())?;
            print_json(&oracle.resolve_with_diagnostics().await)?;
        }
        Command::Project {
            args,
            trace,
            follow,
        } => {
            let oracle = Arc::new(PriceOracle::from_config(&config, QuoteCache::new())?);
            if !follow {
                let quote = oracle.resolve_current_price().await;
                print_json(&build_projection_response(&args, quote, trace)?)?;
                return Ok(());
            }

            // The refresh task's first tick supplies the initial quote.
            let (mut updates, _refresh) = oracle.watch_quotes(config.refresh_interval());
            while updates.changed().await.is_ok() {
                let latest = updates.borrow_and_update().clone();
                if let Some(quote) = latest {
                    print_json(&build_projection_response(&args, quote, trace)?)?;
                }
            }
        }
        Command::WithdrawalRate { args } => {
            let oracle = PriceOracle::from_config(&config, QuoteCache::new())?;
            let quote = oracle.resolve_current_price().await;
            let params = WithdrawalRateParameters::from(&args);
            print_json(&project_withdrawal_rate(&params, &quote)?)?;
        }
        Command::History { start, end, on } => {
            let history = HistoryClient::new(reqwest::Client::new(), &config);
            match (start, end, on) {
                (Some(start), Some(end), None) => {
                    let (start, end) = (parse_date(&start)?, parse_date(&end)?);
                    print_json(&history.fetch_range(start, end).await?)?;
                }
                (None, None, Some(on)) => {
                    let today = Utc::now().date_naive();
                    print_json(&history.fetch_day(parse_date(&on)?, today).await?)?;
                }
                _ => bail!("use either --start/--end or --on"),
            }
        }
        Command::Convert { btc, fiat } => {
            let oracle = PriceOracle::from_config(&config, QuoteCache::new())?;
            let quote = oracle.resolve_current_price().await;
            match (btc, fiat) {
                (Some(units), _) => print_json(&units_to_fiat(units, &quote))?,
                (None, Some(amount)) => print_json(&fiat_to_units(amount, &quote))?,
                (None, None) => bail!("one of --btc or --fiat is required"),
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
