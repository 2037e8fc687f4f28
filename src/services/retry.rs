use std::time::Duration;

use crate::adapters::Env;
use crate::services::config::{env_u64, env_usize};

/// Send retry policy plus the polling cadence for "wait until the
/// typewriter catches up".
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Automatic retries after the first attempt. Recovery beyond this
    /// bound is user-initiated.
    pub max_auto_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub parity_poll_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_auto_retries: 1,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(4_000),
            parity_poll_interval: Duration::from_millis(50),
        }
    }
}

impl RetryConfig {
    /// Reads `CHAT_MAX_AUTO_RETRIES`, `CHAT_RETRY_BASE_DELAY_MS`,
    /// `CHAT_RETRY_MAX_DELAY_MS`, `CHAT_PARITY_POLL_MS`.
    pub fn load(env: &dyn Env) -> Self {
        let max_auto_retries = env_usize(env, "CHAT_MAX_AUTO_RETRIES", 1).clamp(0, 10);
        let base_delay =
            Duration::from_millis(env_u64(env, "CHAT_RETRY_BASE_DELAY_MS", 250).clamp(0, 60_000));
        let max_delay =
            Duration::from_millis(env_u64(env, "CHAT_RETRY_MAX_DELAY_MS", 4_000).clamp(0, 300_000));
        let parity_poll_interval =
            Duration::from_millis(env_u64(env, "CHAT_PARITY_POLL_MS", 50).clamp(5, 1_000));

        Self {
            max_auto_retries,
            base_delay,
            max_delay,
            parity_poll_interval,
        }
    }

    pub fn backoff(&self, retry: usize) -> Duration {
        // retry is 1-based (retry=1 => base_delay)
        if retry <= 1 {
            return self.base_delay.min(self.max_delay);
        }

        let exp_shift = (retry - 1).min(30) as u32;
        let base_ms = self.base_delay.as_millis() as u64;
        let raw_ms = base_ms.saturating_mul(1u64 << exp_shift);
        Duration::from_millis(raw_ms).min(self.max_delay)
    }

    /// Fast variant for tests: no sleeps between attempts.
    pub fn immediate(max_auto_retries: usize) -> Self {
        Self {
            max_auto_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            parity_poll_interval: Duration::from_millis(5),
        }
    }
}
