//! Reconnection Policy
//!
//! Doubling backoff for the upstream WebSocket connection: 1 s after the
//! first failure, doubling up to a 30 s ceiling, reset after a successful
//! handshake. Attempts are unlimited; the connection is maintained
//! indefinitely.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Ceiling for the doubling delay.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Reconnection policy implementing doubling backoff with a ceiling.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Get the delay to sleep before the next attempt, doubling the delay
    /// for subsequent calls up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count += 1;
        let delay = self.current_delay;
        self.current_delay = self
            .current_delay
            .saturating_mul(2)
            .min(self.config.max_delay);
        delay
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn policy_doubles_up_to_ceiling() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        assert_eq!(policy.next_delay(), Duration::from_secs(1));
        assert_eq!(policy.next_delay(), Duration::from_secs(2));
        assert_eq!(policy.next_delay(), Duration::from_secs(4));
        assert_eq!(policy.next_delay(), Duration::from_secs(8));
        assert_eq!(policy.next_delay(), Duration::from_secs(16));
        assert_eq!(policy.next_delay(), Duration::from_secs(30));
        assert_eq!(policy.next_delay(), Duration::from_secs(30));
        assert_eq!(policy.attempt_count(), 7);
    }

    #[test]
    fn policy_reset_restores_initial_delay() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Duration::from_secs(1));
    }
}
