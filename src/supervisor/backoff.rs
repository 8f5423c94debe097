use std::time::Duration;

use serde::Serialize;

/// Exponential reconnection backoff.
///
/// `delay(n) = min(base * growth^n, max_delay)`, where `n` is the number of
/// consecutive failures so far.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub growth: f64,
    pub max_delay: Duration,
    /// Automatic retries stop once the failure count exceeds this.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn delay(&self, attempts: u32) -> Duration {
        let max_ms = self.max_delay.as_millis() as f64;
        let raw = self.base.as_millis() as f64 * self.growth.powi(attempts.min(i32::MAX as u32) as i32);
        let ms = if raw.is_finite() { raw.min(max_ms) } else { max_ms };
        Duration::from_millis(ms.max(0.0).round() as u64)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            growth: 1.5,
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_caps() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay(0), Duration::from_millis(1_000));
        assert_eq!(p.delay(1), Duration::from_millis(1_500));
        assert_eq!(p.delay(2), Duration::from_millis(2_250));
        assert_eq!(p.delay(3), Duration::from_millis(3_375));
        assert_eq!(p.delay(8), Duration::from_millis(25_629));
        assert_eq!(p.delay(9), Duration::from_millis(30_000));
        assert_eq!(p.delay(50), Duration::from_millis(30_000));
    }

    #[test]
    fn delay_matches_formula_for_every_attempt() {
        let p = BackoffPolicy::default();
        for n in 0..=12u32 {
            let expected = (1000.0 * 1.5f64.powi(n as i32)).min(30_000.0).round() as u64;
            assert_eq!(p.delay(n).as_millis() as u64, expected, "attempt {n}");
        }
    }

    #[test]
    fn exhausted_only_past_the_cap() {
        let p = BackoffPolicy::default();
        assert!(!p.exhausted(10));
        assert!(p.exhausted(11));
    }
}
