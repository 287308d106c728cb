//! Exponential backoff for reconnection attempts
//!
//! `delay(n) = min(base * multiplier^(n-1), max)` for attempt `n`, plus
//! uniform jitter of up to `jitter_factor * delay` on top, so a fleet of
//! tenants dropped by the same outage does not reconnect in lockstep.

use crate::config::BackoffConfig;
use crate::core::ReconnectReason;
use rand::Rng;
use std::time::Duration;

/// Delay calculator for one reconnection policy
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    /// Create a new backoff with custom configuration
    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Raw delay for the `retry_count`-th attempt of an episode, before
    /// jitter. Attempt 0 and 1 both map to the base delay.
    pub fn compute_delay(&self, retry_count: u32) -> Duration {
        let max_ms = self.config.max_delay_ms as f64;
        let mut delay_ms = (self.config.base_delay_ms as f64).min(max_ms);

        // Step-wise growth keeps the sequence monotone under float rounding
        if self.config.multiplier > 1.0 {
            for _ in 1..retry_count {
                delay_ms *= self.config.multiplier;
                if delay_ms >= max_ms {
                    delay_ms = max_ms;
                    break;
                }
            }
        }

        Duration::from_millis(delay_ms as u64)
    }

    /// Add uniform jitter in `[0, jitter_factor * delay]`
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor == 0.0 || delay.is_zero() {
            return delay;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen::<f64>() * self.config.jitter_factor;

        delay + Duration::from_secs_f64(delay.as_secs_f64() * jitter)
    }

    /// Delay to wait before the `retry_count`-th attempt started for `reason`
    pub fn delay_for(&self, retry_count: u32, reason: ReconnectReason) -> Duration {
        if reason.skips_backoff() {
            return Duration::ZERO;
        }
        self.with_jitter(self.compute_delay(retry_count))
    }

    /// Whether another attempt fits under the retry ceiling
    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.config.max_retries
    }

    /// Get the configuration
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::with_config(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_documented_sequence() {
        let backoff = ExponentialBackoff::with_config(no_jitter());

        assert_eq!(backoff.compute_delay(1), Duration::from_millis(15_000));
        assert_eq!(backoff.compute_delay(2), Duration::from_millis(30_000));
        assert_eq!(backoff.compute_delay(3), Duration::from_millis(60_000));
        assert_eq!(backoff.compute_delay(4), Duration::from_millis(120_000));
        assert_eq!(backoff.compute_delay(5), Duration::from_millis(240_000));

        // 15s * 2^5 = 480s, clamped
        assert_eq!(backoff.compute_delay(6), Duration::from_millis(300_000));
    }

    #[test]
    fn test_backoff_zero_attempt_is_base() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.compute_delay(0), backoff.config().base_delay());
    }

    #[test]
    fn test_backoff_huge_attempt_is_capped() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.compute_delay(u32::MAX), backoff.config().max_delay());
    }

    #[test]
    fn test_restart_skips_backoff() {
        let backoff = ExponentialBackoff::default();
        for attempt in [1, 4, 9] {
            assert_eq!(
                backoff.delay_for(attempt, ReconnectReason::ServerRestartDetected),
                Duration::ZERO
            );
        }
        assert!(backoff.delay_for(1, ReconnectReason::TransportError) >= Duration::from_secs(15));
    }

    #[test]
    fn test_backoff_jitter_varies() {
        let backoff = ExponentialBackoff::default();
        let delays: Vec<Duration> = (0..5).map(|_| backoff.with_jitter(Duration::from_secs(10))).collect();

        // With jitter these should not all be equal
        // (small chance of false positive, but very unlikely)
        assert!(delays.windows(2).any(|w| w[0] != w[1]), "Jitter should produce varying delays");
    }

    #[test]
    fn test_can_retry_ceiling() {
        let backoff = ExponentialBackoff::with_config(BackoffConfig {
            max_retries: 3,
            ..Default::default()
        });
        assert!(backoff.can_retry(0));
        assert!(backoff.can_retry(2));
        assert!(!backoff.can_retry(3));
        assert!(!backoff.can_retry(4));
    }

    #[test]
    fn test_backoff_aggressive() {
        let backoff = ExponentialBackoff::with_config(BackoffConfig::aggressive());

        assert_eq!(backoff.config().base_delay(), Duration::from_millis(100));
        assert_eq!(backoff.config().max_delay(), Duration::from_secs(2));
        assert_eq!(backoff.config().max_retries, 5);
    }

    proptest! {
        /// Property: raw delay is non-decreasing and bounded by max_delay
        #[test]
        fn prop_delay_monotone_and_bounded(
            base in 1u64..60_000,
            extra in 0u64..600_000,
            multiplier in 1.0f64..4.0,
            n in 0u32..64,
        ) {
            let backoff = ExponentialBackoff::with_config(BackoffConfig {
                base_delay_ms: base,
                max_delay_ms: base + extra,
                multiplier,
                jitter_factor: 0.0,
                ..Default::default()
            });

            let current = backoff.compute_delay(n);
            let next = backoff.compute_delay(n + 1);
            prop_assert!(next >= current, "delay decreased: {:?} -> {:?}", current, next);
            prop_assert!(next <= backoff.config().max_delay());
        }

        /// Property: jitter stays within [delay, delay * (1 + jitter_factor)]
        #[test]
        fn prop_jitter_bounded(delay_ms in 0u64..600_000, factor in 0.0f64..1.0) {
            let backoff = ExponentialBackoff::with_config(BackoffConfig {
                jitter_factor: factor,
                ..Default::default()
            });
            let delay = Duration::from_millis(delay_ms);
            let jittered = backoff.with_jitter(delay);

            prop_assert!(jittered >= delay);
            prop_assert!(jittered.as_secs_f64() <= delay.as_secs_f64() * (1.0 + factor) + 1e-6);
        }
    }
}
