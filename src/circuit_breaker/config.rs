//! Circuit breaker configuration.

use crate::clock::{Clock, MonotonicClock};
use crate::error::CircuitMeshError;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for a [`super::CircuitBreaker`], per design §4.B.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub(crate) failure_rate_threshold: f64,
    pub(crate) minimum_request_threshold: u64,
    pub(crate) circuit_open_window: Duration,
    pub(crate) trial_request_interval: Duration,
    pub(crate) counter_sliding_window: Duration,
    pub(crate) counter_update_interval: Duration,
    pub(crate) clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_rate_threshold", &self.failure_rate_threshold)
            .field("minimum_request_threshold", &self.minimum_request_threshold)
            .field("circuit_open_window", &self.circuit_open_window)
            .field("trial_request_interval", &self.trial_request_interval)
            .field("counter_sliding_window", &self.counter_sliding_window)
            .field("counter_update_interval", &self.counter_update_interval)
            .finish()
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_request_threshold: 10,
            circuit_open_window: Duration::from_secs(10),
            trial_request_interval: Duration::from_secs(3),
            counter_sliding_window: Duration::from_secs(10),
            counter_update_interval: Duration::from_secs(1),
            clock: Arc::new(MonotonicClock::default()),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

/// Builder for [`CircuitBreakerConfig`]; validates on [`Self::build`].
pub struct CircuitBreakerConfigBuilder {
    cfg: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { cfg: CircuitBreakerConfig::default() }
    }

    pub fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.cfg.failure_rate_threshold = threshold;
        self
    }

    pub fn minimum_request_threshold(mut self, threshold: u64) -> Self {
        self.cfg.minimum_request_threshold = threshold;
        self
    }

    pub fn circuit_open_window(mut self, window: Duration) -> Self {
        self.cfg.circuit_open_window = window;
        self
    }

    pub fn trial_request_interval(mut self, interval: Duration) -> Self {
        self.cfg.trial_request_interval = interval;
        self
    }

    pub fn counter_sliding_window(mut self, window: Duration) -> Self {
        self.cfg.counter_sliding_window = window;
        self
    }

    pub fn counter_update_interval(mut self, interval: Duration) -> Self {
        self.cfg.counter_update_interval = interval;
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.cfg.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, CircuitMeshError> {
        let cfg = self.cfg;
        if !(cfg.failure_rate_threshold > 0.0 && cfg.failure_rate_threshold <= 1.0) {
            return Err(CircuitMeshError::config(
                "failure_rate_threshold must be in (0, 1]",
            ));
        }
        if cfg.counter_update_interval.is_zero() {
            return Err(CircuitMeshError::config(
                "counter_update_interval must be > 0",
            ));
        }
        if cfg.counter_sliding_window < cfg.counter_update_interval {
            return Err(CircuitMeshError::config(
                "counter_sliding_window must be >= counter_update_interval",
            ));
        }
        Ok(cfg)
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
