//! Exponential backoff with jitter between reconnect attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::Config;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay, jitter included.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Random spread as a fraction of the delay (0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl ReconnectConfig {
    /// Build from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.ws_reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(config.ws_reconnect_max_delay_ms),
            multiplier: config.ws_reconnect_multiplier,
            jitter_factor: config.ws_reconnect_jitter,
        }
    }
}

/// Retries forever; the delay grows until it hits `max_delay`.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy at attempt zero.
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt. Counts the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        self.attempts = self.attempts.saturating_add(1);

        let initial_ms = self.config.initial_delay.as_secs_f64() * 1000.0;
        let max_ms = self.config.max_delay.as_secs_f64() * 1000.0;
        let base_ms = (initial_ms * self.config.multiplier.powi(exponent)).min(max_ms);

        let jitter = self.config.jitter_factor.clamp(0.0, 1.0);
        let delay_ms = if jitter > 0.0 && base_ms > 0.0 {
            let spread = base_ms * jitter;
            base_ms + rand::rng().random_range(-spread..=spread)
        } else {
            base_ms
        };

        Duration::from_micros((delay_ms.clamp(0.0, max_ms) * 1000.0).round() as u64)
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_ms: u64, max_ms: u64, multiplier: f64, jitter: f64) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: jitter,
        })
    }

    fn ms(d: Duration) -> u128 {
        d.as_millis()
    }

    #[test]
    fn grows_exponentially() {
        let mut policy = policy(100, 10_000, 2.0, 0.0);

        let delays: Vec<u128> = (0..4).map(|_| ms(policy.next_delay())).collect();

        assert_eq!(delays, vec![100, 200, 400, 800]);
        assert_eq!(policy.attempts(), 4);
    }

    #[test]
    fn capped_at_max_delay() {
        let mut policy = policy(1_000, 2_000, 4.0, 0.0);

        policy.next_delay();
        assert_eq!(ms(policy.next_delay()), 2_000);
        assert_eq!(ms(policy.next_delay()), 2_000);
    }

    #[test]
    fn reset_starts_over() {
        let mut policy = policy(50, 1_000, 2.0, 0.0);
        policy.next_delay();
        policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempts(), 0);
        assert_eq!(ms(policy.next_delay()), 50);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut policy = policy(1_000, 60_000, 1.0, 0.2);

        for _ in 0..100 {
            let delay = ms(policy.next_delay());
            assert!((799..=1_200).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn jitter_never_exceeds_max() {
        let mut policy = policy(1_000, 1_000, 2.0, 0.5);

        for _ in 0..50 {
            assert!(policy.next_delay() <= Duration::from_millis(1_000));
        }
    }
}
