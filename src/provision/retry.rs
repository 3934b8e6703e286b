//! Bounded polling.
//!
//! Waiting for NetBox to come up is the only place the manager retries.
//! The budget is explicit and exhausting it is a normal outcome, not an
//! error: the caller downgrades it to a deferred warning.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// How often and how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of probes.
    pub attempts: u32,
    /// Delay before the second probe.
    pub delay: Duration,
    /// Upper bound for the delay when backing off.
    pub max_delay: Duration,
    /// Double the delay after every failed probe.
    pub backoff: bool,
}

impl RetryPolicy {
    /// Fixed delay between probes.
    #[must_use]
    pub const fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            max_delay: delay,
            backoff: false,
        }
    }

    /// Doubling delay capped at `max_delay`.
    #[must_use]
    pub const fn backoff(attempts: u32, delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            max_delay,
            backoff: true,
        }
    }

    /// Token lookup budget: 20 attempts, 3 s apart.
    #[must_use]
    pub const fn token_default() -> Self {
        Self::fixed(20, Duration::from_secs(3))
    }

    /// Budget for the NetBox container to appear after `up`.
    #[must_use]
    pub const fn container_default() -> Self {
        Self::backoff(10, Duration::from_secs(1), Duration::from_secs(8))
    }

    /// Delay after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if !self.backoff {
            return self.delay;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Worst-case total wait, for log messages.
    #[must_use]
    pub fn budget(&self) -> Duration {
        (1..self.attempts).map(|a| self.delay_after(a)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::token_default()
    }
}

/// Result of polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe produced a value.
    Ready(T),
    /// The budget ran out.
    TimedOut {
        /// Number of probes made.
        attempts: u32,
    },
}

impl<T> PollOutcome<T> {
    /// The value, if ready.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Calls `probe` until it returns `Some` or the policy is exhausted.
///
/// `probe` receives the 1-based attempt number.
pub async fn poll<T, F, Fut>(policy: &RetryPolicy, what: &str, mut probe: F) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=policy.attempts {
        if let Some(value) = probe(attempt).await {
            return PollOutcome::Ready(value);
        }

        if attempt < policy.attempts {
            let delay = policy.delay_after(attempt);
            debug!("{what}: not ready (attempt {attempt}/{}), retrying in {delay:?}", policy.attempts);
            tokio::time::sleep(delay).await;
        }
    }

    PollOutcome::TimedOut {
        attempts: policy.attempts,
    }
}
