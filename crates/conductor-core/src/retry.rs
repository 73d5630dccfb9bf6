//! Retry backoff policy

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff: `base_delay_ms * multiplier^retry`, capped at `max_delay_ms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Randomize each delay by up to this fraction in either direction
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `retry` (1-based) without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before retry number `retry`, with jitter applied
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let jitter = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }
}
