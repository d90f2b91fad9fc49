//! Capped exponential backoff with jitter for delivery retries.

use chrono::Duration;
use rand_core::RngCore;

use crate::config::BackoffConfig;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
  base_ms: f64,
  cap_ms:  f64,
  jitter:  f64,
}

impl BackoffPolicy {
  pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
    Self {
      base_ms: base.num_milliseconds().max(0) as f64,
      cap_ms:  cap.num_milliseconds().max(0) as f64,
      jitter:  jitter.clamp(0.0, 1.0),
    }
  }

  /// Delay before the attempt following the `attempt`-th failure:
  /// `min(cap, base * 2^attempt)` scaled by a uniform factor in
  /// `[1 - jitter, 1 + jitter]`, and never above `cap`.
  pub fn delay(&self, attempt: u32, rng: &mut impl RngCore) -> Duration {
    let exponential = self.base_ms * 2f64.powi(attempt.min(62) as i32);
    let nominal = exponential.min(self.cap_ms);
    let factor = 1.0 + self.jitter * (2.0 * unit_interval(rng) - 1.0);
    let millis = (nominal * factor).clamp(0.0, self.cap_ms);
    Duration::try_milliseconds(millis.round() as i64).unwrap_or(Duration::MAX)
  }
}

impl From<&BackoffConfig> for BackoffPolicy {
  fn from(config: &BackoffConfig) -> Self {
    let secs = |s: u64| Duration::try_seconds(s.min(i64::MAX as u64) as i64).unwrap_or(Duration::MAX);
    Self::new(secs(config.base_secs), secs(config.cap_secs), config.jitter)
  }
}

/// Uniform sample in `[0, 1)` from the top 53 bits of a `u64`.
fn unit_interval(rng: &mut impl RngCore) -> f64 {
  (rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
}
