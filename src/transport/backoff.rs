//! Bounded exponential backoff for socket reconnection

use std::time::Duration;

use rand::Rng;

use crate::config::SocketConfig;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited)
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 10,
        }
    }
}

impl From<&SocketConfig> for BackoffConfig {
    fn from(config: &SocketConfig) -> Self {
        Self {
            initial_delay_ms: config.reconnect_initial_delay_ms,
            max_delay_ms: config.reconnect_max_delay_ms,
            max_attempts: config.reconnect_max_attempts,
            ..Self::default()
        }
    }
}

/// Exponential backoff calculator with jitter
pub struct ExponentialBackoff {
    config: BackoffConfig,
    next_base_ms: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms as f64;
        Self {
            config,
            next_base_ms: initial,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts {
            return None;
        }
        self.attempt += 1;

        let capped = self.next_base_ms.min(self.config.max_delay_ms as f64);
        self.next_base_ms = capped * self.config.multiplier;

        let jitter_range = capped * self.config.jitter_factor;
        let delay = if jitter_range > 0.0 {
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped + jitter).max(1.0)
        } else {
            capped.max(1.0)
        };

        Some(Duration::from_millis(delay as u64))
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.next_base_ms = self.config.initial_delay_ms as f64;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn test_delays_double_until_cap() {
        let mut backoff = ExponentialBackoff::new(no_jitter(0));
        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut backoff = ExponentialBackoff::new(no_jitter(3));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = ExponentialBackoff::new(no_jitter(2));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut backoff = ExponentialBackoff::new(BackoffConfig {
            jitter_factor: 0.5,
            ..no_jitter(0)
        });
        let delay = backoff.next_delay().unwrap().as_millis();
        assert!((50..=150).contains(&delay));
    }

    #[test]
    fn test_from_socket_config() {
        let socket = SocketConfig {
            reconnect_initial_delay_ms: 250,
            reconnect_max_attempts: 4,
            ..SocketConfig::default()
        };
        let config = BackoffConfig::from(&socket);
        assert_eq!(config.initial_delay_ms, 250);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.max_delay_ms, 30_000);
    }
}
