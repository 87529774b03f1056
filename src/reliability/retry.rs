use crate::domain::FailureKind;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    ExponentialBackoff,
    LinearBackoff,
    FixedDelay,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; a batch makes at most `max_retries + 1` attempts.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(50_000),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Map an HTTP status to a failure kind. `None` means success.
pub fn classify_status(status: u16) -> Option<FailureKind> {
    match status {
        200..=299 => None,
        408 => Some(FailureKind::Timeout),
        403 | 429 => Some(FailureKind::Quota),
        401 | 404 => Some(FailureKind::Unauthorized),
        400 | 405 | 413 => Some(FailureKind::BadRequest),
        500..=u16::MAX => Some(FailureKind::ServerError),
        _ => Some(FailureKind::Discarded),
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide what to do after attempt number `attempts` failed with `kind`.
    ///
    /// `previous` is the backoff used before this attempt; the returned delay
    /// never goes below it.
    pub fn decide(&self, kind: FailureKind, attempts: u32, previous: Option<Duration>) -> RetryDecision {
        if !kind.is_retriable() || attempts > self.config.max_retries {
            return RetryDecision::GiveUp;
        }

        let delay = self.calculate_delay(attempts);
        RetryDecision::RetryAfter(previous.map_or(delay, |previous| delay.max(previous)))
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let base_ms = self.config.base_delay.as_millis() as u64;

        let delay = match self.config.strategy {
            RetryStrategy::ExponentialBackoff => {
                let multiplier = 2_u64.checked_pow(retry - 1).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(multiplier))
            }
            RetryStrategy::LinearBackoff => Duration::from_millis(base_ms.saturating_mul(u64::from(retry))),
            RetryStrategy::FixedDelay => self.config.base_delay,
        };

        let capped = delay.min(self.config.max_delay);
        if self.config.jitter {
            self.apply_jitter(capped)
        } else {
            capped
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let jitter_factor = rand::rng().random_range(0.5..1.5);
        let jittered = Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64);
        jittered.min(self.config.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
