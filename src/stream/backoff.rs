use std::time::Duration;

use crate::config::TrackerConfig;

/// Tracks reconnect attempts for a single stream subscription
#[derive(Clone, Debug)]
pub struct ReconnectState {
    pub name: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub current_delay: Duration,
}

impl ReconnectState {
    pub fn new(
        name: &str,
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Self {
        ReconnectState {
            name: name.to_string(),
            attempts: 0,
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
            multiplier: multiplier.max(1.0),
            current_delay: base_delay,
        }
    }

    pub fn from_config(name: &str, config: &TrackerConfig) -> Self {
        Self::new(
            name,
            config.reconnect_max_attempts,
            Duration::from_millis(config.reconnect_initial_delay_ms),
            Duration::from_millis(config.reconnect_max_delay_ms),
            config.reconnect_multiplier,
        )
    }

    /// Record a failed connection attempt.
    ///
    /// Returns the delay before the next attempt, or `None` once the
    /// attempt budget is spent.
    pub fn record_failed_attempt(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if !self.can_retry() {
            return None;
        }

        let delay = self.current_delay;
        self.current_delay = Duration::from_secs_f64(
            (self.current_delay.as_secs_f64() * self.multiplier).min(self.max_delay.as_secs_f64()),
        );
        Some(delay)
    }

    /// Record a successful connection and reset the budget
    pub fn record_success(&mut self) {
        if self.attempts > 0 {
            log::info!(
                "[{}] stream connected after {} failed attempt(s)",
                self.name,
                self.attempts
            );
        }
        self.reset();
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.base_delay;
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn status(&self) -> String {
        if self.attempts == 0 {
            return format!("{}: OK", self.name);
        }
        if !self.can_retry() {
            return format!("{}: RETRIES_EXHAUSTED ({} attempts)", self.name, self.attempts);
        }
        format!(
            "{}: RECONNECTING (attempt {}/{}, next in {:.1}s)",
            self.name,
            self.attempts + 1,
            self.max_attempts,
            self.current_delay.as_secs_f64()
        )
    }
}
