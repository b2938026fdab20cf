//! Saga configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Settings shared by the checkout coordinator and the order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaConfig {
    /// Deadline for one checkout, checked between steps.
    pub timeout: Duration,
    /// Backoff for pure reversals.
    pub retry: RetryPolicy,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl SagaConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
