//! Retry-with-backoff decorator shared by every external call site.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use rand::Rng;

use crate::external::classify::ExternalCallOutcome;

/// Bounded retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always >= 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the random extra delay added to each backoff.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter,
        }
    }

    /// No waiting between attempts; used by tests and local dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let exp = self.base_delay.saturating_mul(1u32 << shift);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return exp;
        }
        let extra = rand::rng().random_range(0..=jitter_ms);
        exp.saturating_add(Duration::from_millis(extra))
    }
}

/// Errors that may carry a classified external outcome.
pub trait Classified {
    /// The classified outcome, when the failure came from the vendor call itself.
    fn outcome(&self) -> Option<&ExternalCallOutcome>;

    fn is_retryable(&self) -> bool {
        self.outcome().is_some_and(ExternalCallOutcome::is_retryable)
    }
}

impl Classified for ExternalCallOutcome {
    fn outcome(&self) -> Option<&ExternalCallOutcome> {
        Some(self)
    }
}

/// Run `op` until it succeeds, fails terminally, or `policy.max_attempts` is used up.
///
/// Every classified failure is counted in `external_call_outcomes_total`, including
/// the ones that are later recovered by a retry.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Classified + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        let err = match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if let Some(outcome) = err.outcome() {
            counter!(
                "external_call_outcomes_total",
                "vendor" => outcome.vendor.clone(),
                "kind" => outcome.kind.as_str()
            )
            .increment(1);
        }

        if !err.is_retryable() || attempt >= policy.max_attempts {
            if err.is_retryable() {
                tracing::warn!(target: "external", call = label, attempt, error = %err, "retries exhausted");
            }
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        tracing::warn!(
            target: "external",
            call = label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retryable failure, backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
