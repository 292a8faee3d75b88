use crate::{
    commands::{Commands, InputArgs},
    error::CliError,
    shutdown::{ExitCode, wait_for_signal},
};
use clap::Parser;
use connectors::memory::{MemoryDestination, MemorySource};
use engine_runtime::{Connections, RunReport, start_run};
use model::{
    catalog::{self, sample::hr_sales_catalog, table::TableDescriptor},
    config::MigrationConfig,
    execution::{
        log::LogLevel,
        status::RunStatus,
    },
};
use planner::{MigrationPlan, build_plan, report::dry_run::dry_run};
use std::{pin::pin, sync::Arc, time::Duration};
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(
    name = "migrate",
    version = "0.1.0",
    about = "Dependency-ordered, batched table migration engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match execute(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "Command failed");
            ExitCode::GeneralError
        }
    };

    std::process::exit(code.as_i32());
}

async fn execute(command: Commands) -> Result<ExitCode, CliError> {
    match command {
        Commands::Plan { input } => {
            let (_, plan) = load_plan(&input).await?;
            output::emit(&plan, None).await?;
        }
        Commands::DryRun { input, output } => {
            let (_, plan) = load_plan(&input).await?;
            let report = dry_run(&plan);
            info!(
                status = ?report.summary.status,
                tables = report.summary.tables,
                batches = report.summary.estimated_batches,
                findings = report.findings.len(),
                "Dry run finished"
            );
            output::emit(&report, output).await?;
        }
        Commands::Run {
            input,
            output,
            log_level,
        } => {
            let (catalog, plan) = load_plan(&input).await?;
            let (report, interrupted) = run(&catalog, plan).await?;
            print_log(&report, log_level);
            output::emit(&report, output).await?;

            return Ok(match report.status {
                RunStatus::Completed => ExitCode::Success,
                RunStatus::Cancelled if interrupted => ExitCode::Interrupted,
                RunStatus::Failed => ExitCode::TablesFailed,
                _ => ExitCode::GeneralError,
            });
        }
        Commands::SampleCatalog { output } => {
            output::emit(&hr_sales_catalog(), output).await?;
        }
    }

    Ok(ExitCode::Success)
}

async fn load_catalog(path: Option<&str>) -> Result<Vec<TableDescriptor>, CliError> {
    match path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            Ok(catalog::from_json(&raw)?)
        }
        None => Ok(hr_sales_catalog()),
    }
}

async fn load_config(input: &InputArgs) -> Result<MigrationConfig, CliError> {
    let mut config = match &input.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            serde_json::from_str(&raw)?
        }
        None => MigrationConfig::default(),
    };

    if let Some(v) = input.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = input.max_parallel {
        config.max_parallel = v;
    }
    if let Some(v) = input.conflict_policy {
        config.conflict_policy = v;
    }
    if let Some(v) = input.transaction_mode {
        config.transaction_mode = v;
    }
    if let Some(v) = input.max_retries {
        config.max_retries = v;
    }
    if let Some(v) = input.retry_base_delay_ms {
        config.retry_base_delay_ms = v;
    }
    if let Some(v) = input.retry_max_delay_ms {
        config.retry_max_delay_ms = v;
    }
    if let Some(v) = input.batch_timeout_ms {
        config.batch_timeout_ms = v;
    }
    if let Some(v) = input.idle_attempt_limit {
        config.idle_attempt_limit = v;
    }

    Ok(config)
}

async fn load_plan(input: &InputArgs) -> Result<(Vec<TableDescriptor>, MigrationPlan), CliError> {
    let catalog = load_catalog(input.catalog.as_deref()).await?;
    let config = load_config(input).await?;
    let plan = build_plan(&catalog, &config)?;
    Ok((catalog, plan))
}

/// Runs `plan` over in-memory connectors seeded from `catalog`, logging
/// progress until the run settles. The first SIGINT or SIGTERM cancels the
/// run at the next batch boundary; the flag reports whether that happened.
async fn run(
    catalog: &[TableDescriptor],
    plan: MigrationPlan,
) -> Result<(RunReport, bool), CliError> {
    let connections = Connections::new(
        Arc::new(MemorySource::from_catalog(catalog)),
        Arc::new(MemoryDestination::from_catalog(catalog)),
    );
    let handle = start_run(plan, connections);
    let mut state = handle.subscribe();
    let mut ticker = interval(PROGRESS_INTERVAL);
    let mut signal = pin!(wait_for_signal());
    let mut interrupted = false;

    loop {
        tokio::select! {
            received = &mut signal, if !interrupted => {
                interrupted = true;
                warn!(run_id = %handle.run_id(), signal = %received, "Cancelling migration at the next batch boundary");
                handle.cancel();
            }
            settled = state.wait_for(|s| s.status.is_terminal()) => {
                if settled.is_err() {
                    warn!(run_id = %handle.run_id(), "Run state channel closed");
                }
                break;
            }
            _ = ticker.tick() => {
                let snapshot = handle.status();
                info!(
                    status = %snapshot.status,
                    level = ?snapshot.current_level,
                    rows = snapshot.rows_copied,
                    total = snapshot.total_rows,
                    progress = format!("{:.1}%", snapshot.progress * 100.0),
                    rows_per_second = format!("{:.0}", snapshot.rows_per_second),
                    eta_secs = snapshot.eta.map(|eta| eta.as_secs()),
                    "Migration progress"
                );
            }
        }
    }

    let report = handle.wait().await?;
    Ok((report, interrupted))
}

fn print_log(report: &RunReport, level: Option<LogLevel>) {
    for entry in report.log.filter(level) {
        eprintln!(
            "{} {:<5} {}",
            entry.at.format("%H:%M:%S%.3f"),
            entry.level.to_string(),
            entry.message
        );
    }
}
