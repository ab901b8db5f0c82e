use std::time::Duration;

use rand::Rng;

use ss_domain::config::CompletionConfig;

/// Exponential backoff with a cap and additive random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.backoff_base_ms),
            cap: Duration::from_millis(config.backoff_max_ms),
            jitter: Duration::from_millis(config.backoff_jitter_ms),
        }
    }

    /// `min(base * 2^(attempt-1), cap)` for the 1-based failed attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base.saturating_mul(1 << exp).min(self.cap)
    }

    /// [`RetryPolicy::base_delay`] plus up to `jitter` of random delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(extra)
    }
}
