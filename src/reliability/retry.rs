use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    ExponentialBackoff,
    LinearBackoff,
    FixedDelay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total send attempts per batch, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Stop retrying once this much time has passed since the first failure.
    pub max_elapsed: Option<Duration>,
    pub strategy: RetryStrategy,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            max_elapsed: None,
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Decides whether a failed batch is sent again, and after how long.
///
/// Stateless: the caller tracks how many attempts a batch has used.
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

    /// `attempt` is the number of failed attempts so far, starting at 1.
    pub fn next_delay(&self, attempt: u32) -> RetryDecision {
        self.next_delay_after(attempt, Duration::ZERO)
    }

    pub fn next_delay_after(&self, attempt: u32, elapsed: Duration) -> RetryDecision {
        if attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }
        if let Some(max_elapsed) = self.config.max_elapsed
            && elapsed >= max_elapsed
        {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.calculate_delay(attempt))
    }

    /// Combines the policy's delay with a server `Retry-After` hint; the longer
    /// one wins, capped at `max_delay`.
    pub fn effective_delay(&self, policy_delay: Duration, hint: Option<Duration>) -> Duration {
        hint.map_or(policy_delay, |hint| policy_delay.max(hint))
            .min(self.config.max_delay)
    }

    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let step = attempt.max(1) - 1;
        let base_millis = self.config.base_delay.as_millis() as u64;
        let base_delay = match self.config.strategy {
            RetryStrategy::ExponentialBackoff => {
                let multiplier = 2_u64.checked_pow(step).unwrap_or(u64::MAX);
                Duration::from_millis(base_millis.saturating_mul(multiplier))
            }
            RetryStrategy::LinearBackoff => {
                Duration::from_millis(base_millis.saturating_mul(step as u64 + 1))
            }
            RetryStrategy::FixedDelay => self.config.base_delay,
        };

        let capped_delay = base_delay.min(self.config.max_delay);

        if self.config.jitter {
            self.apply_jitter(capped_delay)
        } else {
            capped_delay
        }
    }

    // Adds up to 50% on top, never below the unjittered delay.
    fn apply_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let jitter_factor: f64 = rng.random_range(0.0..0.5);
        let extra = Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64);
        (delay + extra).min(self.config.max_delay.max(delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
