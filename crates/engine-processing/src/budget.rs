use engine_core::retry::RetryPolicy;
use std::time::Duration;

/// Consecutive-failure accounting for one table.
///
/// Transient failures draw on the retry budget; timed-out attempts draw on
/// the idle limit. Both reset once the table makes progress.
#[derive(Clone, Debug)]
pub struct RetryBudget {
    policy: RetryPolicy,
    idle_limit: u32,
    consecutive_failures: u32,
    idle_attempts: u32,
    total_retries: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BudgetState {
    RetryAfter(Duration),
    Exhausted,
}

impl RetryBudget {
    pub fn new(policy: RetryPolicy, idle_limit: u32) -> Self {
        Self {
            policy,
            idle_limit: idle_limit.max(1),
            consecutive_failures: 0,
            idle_attempts: 0,
            total_retries: 0,
        }
    }

    pub fn record_failure(&mut self) -> BudgetState {
        if self.consecutive_failures >= self.policy.max_retries {
            return BudgetState::Exhausted;
        }

        let delay = self.policy.backoff_delay(self.consecutive_failures);
        self.consecutive_failures += 1;
        self.total_retries += 1;
        BudgetState::RetryAfter(delay)
    }

    /// Returns `true` once `idle_limit` consecutive attempts have timed out.
    pub fn record_idle(&mut self) -> bool {
        self.idle_attempts = self.idle_attempts.saturating_add(1);
        self.idle_attempts >= self.idle_limit
    }

    /// A batch went through; the stall counter starts over.
    pub fn record_batch(&mut self) {
        self.idle_attempts = 0;
    }

    /// Rows are durably committed; the retry budget starts over.
    pub fn record_durable_progress(&mut self) {
        self.consecutive_failures = 0;
        self.idle_attempts = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn idle_attempts(&self) -> u32 {
        self.idle_attempts
    }

    pub fn total_retries(&self) -> u32 {
        self.total_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(max_retries: u32) -> RetryBudget {
        RetryBudget::new(
            RetryPolicy::new(max_retries, Duration::from_millis(10), Duration::from_millis(25)),
            2,
        )
    }

    #[test]
    fn allows_exactly_max_retries() {
        let mut budget = budget(2);
        assert_eq!(budget.record_failure(), BudgetState::RetryAfter(Duration::from_millis(10)));
        assert_eq!(budget.record_failure(), BudgetState::RetryAfter(Duration::from_millis(20)));
        assert_eq!(budget.record_failure(), BudgetState::Exhausted);
        assert_eq!(budget.total_retries(), 2);
    }

    #[test]
    fn zero_retries_fails_on_first_error() {
        assert_eq!(budget(0).record_failure(), BudgetState::Exhausted);
    }

    #[test]
    fn durable_progress_resets_the_budget() {
        let mut budget = budget(1);
        assert!(matches!(budget.record_failure(), BudgetState::RetryAfter(_)));
        budget.record_durable_progress();
        assert!(matches!(budget.record_failure(), BudgetState::RetryAfter(_)));
        assert_eq!(budget.total_retries(), 2);
    }

    #[test]
    fn idle_limit_counts_consecutive_timeouts() {
        let mut budget = budget(3);
        assert!(!budget.record_idle());
        budget.record_batch();
        assert!(!budget.record_idle());
        assert!(budget.record_idle());
    }
}
