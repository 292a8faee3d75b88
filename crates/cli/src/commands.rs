use clap::{Args, Subcommand};
use model::{
    config::{ConflictPolicy, TransactionMode},
    execution::log::LogLevel,
};

#[derive(Subcommand)]
pub enum Commands {
    /// Order the catalog into dependency levels and print the plan as JSON
    Plan {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Estimate batches and report findings without moving any rows
    DryRun {
        #[command(flatten)]
        input: InputArgs,

        #[arg(
            long,
            help = "If specified, writes the JSON report to this file instead of stdout"
        )]
        output: Option<String>,
    },
    /// Run the migration against in-memory connectors filled with fixture rows
    Run {
        #[command(flatten)]
        input: InputArgs,

        #[arg(
            long,
            help = "If specified, writes the JSON run report to this file instead of stdout"
        )]
        output: Option<String>,

        #[arg(long, help = "Only print run log entries at this level (info, warn, error)")]
        log_level: Option<LogLevel>,
    },
    /// Print the HR / SALES demo catalog as JSON
    SampleCatalog {
        #[arg(long, help = "If specified, writes the catalog to this file instead of stdout")]
        output: Option<String>,
    },
}

#[derive(Args, Debug, Default)]
pub struct InputArgs {
    #[arg(
        long,
        help = "Schema catalog JSON file; the HR / SALES demo catalog is used when omitted"
    )]
    pub catalog: Option<String>,

    #[arg(long, help = "Migration settings JSON file; flags below override its fields")]
    pub config: Option<String>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub max_parallel: Option<usize>,

    #[arg(long, help = "skip, truncate or fail")]
    pub conflict_policy: Option<ConflictPolicy>,

    #[arg(long, help = "per-table or per-batch")]
    pub transaction_mode: Option<TransactionMode>,

    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(long)]
    pub retry_base_delay_ms: Option<u64>,

    #[arg(long)]
    pub retry_max_delay_ms: Option<u64>,

    #[arg(long, help = "Per read/write timeout in milliseconds, 0 disables it")]
    pub batch_timeout_ms: Option<u64>,

    #[arg(long)]
    pub idle_attempt_limit: Option<u32>,
}
