//! Bounded retry with exponential backoff and jitter.

use rand::Rng;
use std::time::Duration;

/// Retry policy applied to an executor before its failure is terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Total attempts including the first; 1 means no retry.
  pub max_attempts: u32,
  pub base_delay: Duration,
  /// Backoff factor applied per failed attempt.
  pub multiplier: f64,
  /// Random fraction of the delay added on top; 0.0 disables jitter.
  pub jitter: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::none()
  }
}

impl RetryPolicy {
  /// No retry: the first failure is terminal.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      base_delay: Duration::ZERO,
      multiplier: 1.0,
      jitter: 0.0,
    }
  }

  pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      base_delay,
      multiplier: 2.0,
      jitter: 0.1,
    }
  }

  pub fn with_multiplier(mut self, multiplier: f64) -> Self {
    self.multiplier = multiplier;
    self
  }

  pub fn with_jitter(mut self, jitter: f64) -> Self {
    self.jitter = jitter;
    self
  }

  /// Delay before the next attempt after `failed_attempts` failures, or
  /// `None` when the attempts are exhausted.
  pub fn delay_for(&self, failed_attempts: u32) -> Option<Duration> {
    if failed_attempts >= self.max_attempts {
      return None;
    }
    let exponent = failed_attempts.saturating_sub(1);
    let backoff = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent as i32);
    let jittered = if self.jitter > 0.0 {
      backoff * (1.0 + rand::thread_rng().gen_range(0.0..self.jitter))
    } else {
      backoff
    };
    Some(Duration::from_secs_f64(jittered))
  }
}
