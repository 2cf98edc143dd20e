//! # Clickstream Loader Entry Point
//!
//! Loads a clickstream CSV export into the `user_events` table.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use clickstream_loader::{
    config::{ConfigLoader, ConfigOverrides},
    run_ingestion,
    telemetry::{init_tracing, new_run_id},
};
use tracing::{Instrument, info, info_span};

/// Load clickstream events from CSV into the user_events table.
#[derive(Debug, Parser)]
#[command(name = "clickstream-loader", version, about)]
struct Cli {
    /// CSV file to load
    #[arg(value_name = "SOURCE")]
    source_path: Option<PathBuf>,

    /// CSV file to load (same as the positional argument)
    #[arg(long = "source", conflicts_with = "source_path")]
    source_flag: Option<PathBuf>,

    /// Records per transactional batch
    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    database: Option<String>,

    /// Full connection URL, overriding host/port/user/database
    #[arg(long)]
    database_url: Option<String>,

    #[arg(long)]
    log_level: Option<String>,
}

impl From<Cli> for ConfigOverrides {
    fn from(cli: Cli) -> Self {
        ConfigOverrides {
            source_path: cli.source_path.or(cli.source_flag),
            batch_size: cli.batch_size,
            log_level: cli.log_level,
            db_host: cli.host,
            db_port: cli.port,
            db_user: cli.user,
            db_name: cli.database,
            database_url: cli.database_url,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let overrides = ConfigOverrides::from(Cli::parse());

    // Load configuration from layered env files, variables and flags
    let config = ConfigLoader::new()
        .load_with_overrides(&overrides)
        .context("failed to load configuration")?;

    init_tracing(&config).context("failed to initialize logging")?;

    let run_id = new_run_id();
    let span = info_span!("ingestion", run_id = %run_id);

    if let Ok(redacted_json) = config.redacted_json() {
        info!(parent: &span, profile = %config.profile, "Loaded configuration: {}", redacted_json);
    }

    match run_ingestion(&config).instrument(span).await {
        Ok(report) => {
            println!(
                "Loaded {} rows in {} batches in {:.2}s",
                report.total_rows,
                report.batches(),
                report.elapsed.as_secs_f64()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            eprintln!("Error: {failure}");
            eprintln!(
                "{} rows were committed before the failure",
                failure.committed_rows
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
