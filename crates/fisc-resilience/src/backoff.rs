//! Capped exponential backoff between retries of a transient failure

use fisc_core::RetrySettings;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
    max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl Backoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration, max_retries: u32) -> Self {
        Self {
            base,
            multiplier: multiplier.max(1.0),
            max: max.max(base),
            max_retries,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_delay_ms),
            settings.multiplier,
            Duration::from_millis(settings.max_delay_ms),
            settings.max_retries,
        )
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry `n` (0-based): `min(base * multiplier^n, max)`
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(64) as i32);
        let millis = self.base.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= self.max.as_millis() as f64 {
            return self.max;
        }
        Duration::from_millis(millis as u64)
    }

    /// Delay before retry `n`, or `None` when retries are exhausted or
    /// sleeping would run past `deadline`
    pub fn next_delay_within(&self, retry: u32, deadline: Instant) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        let delay = self.delay(retry);
        (Instant::now() + delay < deadline).then_some(delay)
    }
}
