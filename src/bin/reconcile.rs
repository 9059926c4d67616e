//! Standalone reconciliation CLI (§4.I). Runs one pass outside the
//! in-process cron sweep — useful for an operator forcing an out-of-band
//! run, or for wiring into an external scheduler instead of the
//! in-process one. Exit codes: 0 clean, 1 repairs applied, 2 fatal error.

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use sqlx::PgPool;

use creditcore::config::Config;
use creditcore::core::psp::Mollie;
use creditcore::core::reconciliation;
use creditcore::database::reconciliation::Granularity;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GranularityArg {
    Safety,
    PspComparison,
    Full,
}

impl From<GranularityArg> for Granularity {
    fn from(value: GranularityArg) -> Self {
        match value {
            GranularityArg::Safety => Granularity::Safety,
            GranularityArg::PspComparison => Granularity::PspComparison,
            GranularityArg::Full => Granularity::Full,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "creditcore-reconcile", about = "Run one reconciliation pass")]
struct Args {
    #[arg(long, value_enum, default_value = "full")]
    granularity: GranularityArg,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = Config::from_env();

    let pool = match PgPool::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            return ExitCode::from(2);
        }
    };

    let psp: Arc<dyn creditcore::core::psp::PaymentProvider> = Arc::new(Mollie::new(config.mollie_api_key.clone()));

    let run = match reconciliation::run(&pool, psp.as_ref(), args.granularity.into(), Utc::now()).await {
        Ok(run) => run,
        Err(e) => {
            tracing::error!(error = %e, "reconciliation run failed");
            return ExitCode::from(2);
        }
    };

    tracing::info!(
        run_id = %run.id,
        found = run.discrepancies_found,
        fixed = run.discrepancies_fixed,
        "reconciliation pass complete"
    );

    if run.discrepancies_found > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
