use engine_runtime::RunError;
use planner::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read input file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to deserialize JSON input: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(serde_json::Error),

    #[error("Invalid migration plan: {0}")]
    Plan(#[from] ConfigError),

    #[error("Failed to run the migration plan: {0}")]
    Runner(#[from] RunError),
}
