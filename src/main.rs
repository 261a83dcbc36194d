mod api_client;
mod campaigns;
mod config;
mod data;
mod error;
mod insights;
mod loader;
mod retry;
mod runner;
mod schema;
mod warehouse;
mod watermark;
mod windows;

use api_client::{MarketingApiClient, UsageThrottle};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use config::Config;
use error::Error;
use log::{error, info, warn};
use runner::RunPolicies;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use warehouse::BigQueryClient;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Incremental run: load every day from the stored watermark to today.
    Run,

    /// Reload an explicit date range, ignoring the stored watermark.
    Backfill {
        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: NaiveDate,

        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: NaiveDate,
    },
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split("-")
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if month <= 12 && day <= 31 => {
            Ok(
                NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .ok_or(error_message)?,
            )
        }
        _ => Err(error_message.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    if let Err(err) = args.config.validate() {
        error!("{err}");
        std::process::exit(1);
    }

    // Cooperative shutdown: the orchestrator checks this between windows,
    // never mid-insert.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, stopping after the current window");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let api = MarketingApiClient::new(&args.config);
    let warehouse = BigQueryClient::new(&args.config);
    let throttle = UsageThrottle::default();
    let policies = RunPolicies::default();

    let result = match &args.command {
        Command::Run => {
            runner::run_incremental(
                &api,
                &throttle,
                &warehouse,
                &policies,
                args.config.backfill_start,
                Utc::now().date_naive(),
                &stop,
            )
            .await
        }
        Command::Backfill { start, end } => {
            runner::run_backfill(&api, &throttle, &warehouse, &policies, *start, *end, &stop).await
        }
    };

    match result {
        Ok(report) => {
            info!(
                "finished with status {:?}: {} rows loaded",
                report.status, report.rows_loaded
            );
            for anomaly in &report.anomalies {
                warn!("needs replay: {anomaly}");
            }
            Ok(())
        }
        Err(err) => {
            error!("pipeline run failed: {err}");
            std::process::exit(1);
        }
    }
}
