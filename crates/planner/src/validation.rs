use crate::error::ConfigError;
use model::config::MigrationConfig;

/// Rejects settings the engine cannot run with.
pub fn validate_config(config: &MigrationConfig) -> Result<(), ConfigError> {
    if config.batch_size == 0 {
        return Err(ConfigError::InvalidBatchSize(config.batch_size));
    }

    if config.max_parallel == 0 {
        return Err(ConfigError::InvalidParallelism(config.max_parallel));
    }

    if config.retry_max_delay_ms < config.retry_base_delay_ms {
        return Err(ConfigError::InvalidRetryDelays {
            base_ms: config.retry_base_delay_ms,
            max_ms: config.retry_max_delay_ms,
        });
    }

    if config.idle_attempt_limit == 0 {
        return Err(ConfigError::InvalidIdleLimit);
    }

    Ok(())
}
