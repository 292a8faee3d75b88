use connectors::error::{ExtractError, LoadError};
use model::config::MigrationConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

/// Result of running an operation under the retry policy.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was considered fatal and should bubble up immediately.
    Fatal(E),
    /// The error was retryable, but the configured retries were exhausted.
    AttemptsExceeded(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(e) | RetryError::AttemptsExceeded(e) => e,
        }
    }
}

/// Exponential backoff: the base delay doubles with each retry, capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt. `0` means fail on first error.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(
            config.max_retries,
            config.retry_base_delay(),
            config.retry_max_delay(),
        )
    }

    /// Executes the operation, retrying errors `classify` marks as transient.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        mut op: F,
        classify: Classifier,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
    {
        let mut retries = 0;

        loop {
            match op().await {
                Ok(result) => return Ok(result),
                Err(err) => match classify(&err) {
                    RetryDisposition::Stop => return Err(RetryError::Fatal(err)),
                    RetryDisposition::Retry => {
                        if retries >= self.max_retries {
                            return Err(RetryError::AttemptsExceeded(err));
                        }

                        sleep(self.backoff_delay(retries)).await;
                        retries += 1;
                    }
                },
            }
        }
    }

    /// Delay before retry number `retry + 1`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let factor = 1u128 << retry.min(6);
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

pub fn classify_extract_error(err: &ExtractError) -> RetryDisposition {
    if err.is_transient() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Stop
    }
}

pub fn classify_load_error(err: &LoadError) -> RetryDisposition {
    if err.is_transient() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::identifiers::QualifiedName;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> LoadError {
        LoadError::Transient {
            table: QualifiedName::new("HR", "JOBS"),
            message: "deadlock victim".into(),
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(350));
        assert_eq!(policy.backoff_delay(30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn stops_after_max_retries() {
        let policy = RetryPolicy::new(2, Duration::ZERO, Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(transient()) }
                },
                classify_load_error,
            )
            .await;

        assert!(matches!(result, Err(RetryError::AttemptsExceeded(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO, Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(LoadError::Constraint {
                            table: QualifiedName::new("HR", "JOBS"),
                            message: "PK violation".into(),
                            offending_rows: vec![3],
                        })
                    }
                },
                classify_load_error,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
