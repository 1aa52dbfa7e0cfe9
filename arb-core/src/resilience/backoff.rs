//! Exponential backoff for retry logic.
//!
//! Provides configurable exponential backoff with jitter to prevent
//! thundering herd problems when reconnecting to the exchange.

use rand::Rng;
use std::time::Duration;

/// Configuration for exponential backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for each retry (typically 2.0).
    pub multiplier: f64,
    /// Maximum number of retry attempts (`None` = unlimited).
    pub max_retries: Option<usize>,
    /// Add randomization to prevent thundering herd (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: None,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Builds a config from the `network_retry_count`/`network_retry_delay`
    /// risk-section keys (§6): `max_retries` bounded, initial delay taken
    /// directly from config, the rest left at sane defaults.
    pub fn from_network_retry(count: u32, delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay.max(Duration::from_secs(1)) * 10,
            multiplier: 2.0,
            max_retries: Some(count as usize),
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff state machine.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_attempt: usize,
    current_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            current_attempt: 0,
            config,
        }
    }

    /// Returns the next delay and advances the backoff state, or `None` if
    /// max retries have been exceeded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max_retries) = self.config.max_retries {
            if self.current_attempt >= max_retries {
                return None;
            }
        }

        let delay = self.calculate_delay_with_jitter();

        self.current_attempt += 1;
        self.current_delay = std::cmp::min(
            Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.config.multiplier),
            self.config.max_delay,
        );

        Some(delay)
    }

    fn calculate_delay_with_jitter(&self) -> Duration {
        if self.config.jitter_factor == 0.0 {
            return self.current_delay;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen::<f64>() * self.config.jitter_factor;
        let jitter_multiplier = 1.0 + (jitter - self.config.jitter_factor / 2.0);

        Duration::from_secs_f64(self.current_delay.as_secs_f64() * jitter_multiplier)
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempt_number(&self) -> usize {
        self.current_attempt
    }

    pub fn can_retry(&self) -> bool {
        match self.config.max_retries {
            Some(max) => self.current_attempt < max,
            None => true,
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_basic_growth() {
        let mut backoff = ExponentialBackoff::new();
        assert_eq!(backoff.attempt_number(), 0);
        assert!(backoff.can_retry());

        let delay1 = backoff.next_delay().unwrap();
        assert_eq!(backoff.attempt_number(), 1);
        let delay2 = backoff.next_delay().unwrap();
        assert_eq!(backoff.attempt_number(), 2);
        assert!(delay2 > delay1);
    }

    #[test]
    fn backoff_respects_max_retries() {
        let config = BackoffConfig {
            max_retries: Some(3),
            ..Default::default()
        };
        let mut backoff = ExponentialBackoff::with_config(config);

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(!backoff.can_retry());
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_retries: Some(20),
            jitter_factor: 0.0,
        };
        let mut backoff = ExponentialBackoff::with_config(config);

        let mut last_delay = Duration::from_secs(0);
        for _ in 0..10 {
            if let Some(delay) = backoff.next_delay() {
                assert!(delay <= Duration::from_millis(100));
                last_delay = delay;
            }
        }
        assert!(last_delay >= Duration::from_millis(80));
    }

    #[test]
    fn backoff_reset_returns_to_initial_state() {
        let mut backoff = ExponentialBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt_number(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt_number(), 0);
        assert!(backoff.can_retry());
    }

    #[test]
    fn from_network_retry_uses_configured_count_and_delay() {
        let config = BackoffConfig::from_network_retry(3, Duration::from_secs(2));
        assert_eq!(config.max_retries, Some(3));
        assert_eq!(config.initial_delay, Duration::from_secs(2));
    }
}
