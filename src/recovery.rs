//! Retry and deadline handling for store requests
//!
//! Every transport call made by the engine goes through a [`Retrier`]: the
//! call runs under the request deadline, transport failures are classified
//! into [`StoreError`]s, and `Timeout`/`Transient` failures are retried with
//! backoff until the attempt budget is spent. Everything else propagates on
//! the first failure.
//!
//! ```
//! use stowage::recovery::{BackoffStrategy, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     max_attempts: 5,
//!     initial_delay: Duration::from_millis(100),
//!     max_delay: Duration::from_secs(30),
//!     backoff: BackoffStrategy::ExponentialWithJitter,
//!     ..Default::default()
//! };
//! assert!(policy.calculate_delay(3) >= Duration::from_millis(400));
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Operation, StoreError, StoreResult};
use crate::transport::TransportResult;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per request, including the first
    pub max_attempts: u32,

    /// Initial delay before first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff strategy to use
    pub backoff: BackoffStrategy,

    /// Jitter factor (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            backoff: BackoffStrategy::ExponentialWithJitter,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate delay before retry number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_delay = match self.backoff {
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => {
                let multiplier = 2_u32.saturating_pow(attempt - 1);
                self.initial_delay.saturating_mul(multiplier)
            }
            BackoffStrategy::Fixed => self.initial_delay,
        };

        // Cap at max_delay
        let capped_delay = base_delay.min(self.max_delay);

        if matches!(self.backoff, BackoffStrategy::ExponentialWithJitter) && self.jitter_factor > 0.0
        {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            let jitter_amount = capped_delay.as_secs_f64() * jitter;
            capped_delay + Duration::from_secs_f64(jitter_amount)
        } else {
            capped_delay
        }
    }
}

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,

    /// Linear increase in delay
    Linear,

    /// Exponential increase in delay (2^n)
    Exponential,

    /// Exponential with random jitter to prevent thundering herd
    ExponentialWithJitter,
}

/// Execute an operation with retry logic
///
/// Only errors for which [`StoreError::is_retryable`] holds are retried.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= policy.max_attempts || !e.is_retryable() {
                    return Err(e);
                }

                let delay = policy.calculate_delay(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient failure"
                );
                sleep(delay).await;
            }
        }
    }
}

/// Runs transport calls under a deadline and a retry policy
#[derive(Debug, Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    deadline: Duration,
}

impl Retrier {
    pub fn new(policy: RetryPolicy, deadline: Duration) -> Self {
        Self { policy, deadline }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run one store request, retrying transient failures
    pub async fn run<F, Fut, T>(
        &self,
        operation: Operation,
        bucket: &str,
        key: &str,
        mut call: F,
    ) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        with_retry(&self.policy, || self.attempt(operation, bucket, key, call())).await
    }

    /// Run one store request once, without retries
    pub async fn once<Fut, T>(
        &self,
        operation: Operation,
        bucket: &str,
        key: &str,
        call: Fut,
    ) -> StoreResult<T>
    where
        Fut: Future<Output = TransportResult<T>>,
    {
        self.attempt(operation, bucket, key, call).await
    }

    async fn attempt<Fut, T>(
        &self,
        operation: Operation,
        bucket: &str,
        key: &str,
        call: Fut,
    ) -> StoreResult<T>
    where
        Fut: Future<Output = TransportResult<T>>,
    {
        match tokio::time::timeout(self.deadline, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => {
                debug!(%operation, bucket, key, %error, "Store request failed");
                Err(StoreError::from_transport(operation, bucket, key, error)
                    .with_deadline(self.deadline))
            }
            Err(_) => Err(StoreError::Timeout {
                operation,
                bucket: bucket.to_string(),
                key: key.to_string(),
                after: self.deadline,
            }),
        }
    }
}
