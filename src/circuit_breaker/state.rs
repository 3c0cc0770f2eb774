//! Circuit breaker state machine (design component B).

use super::config::CircuitBreakerConfig;
use super::listener::{CircuitBreakerListener, ListenerRegistry};
use super::rule::{CallOutcome, Classification, RuleEvaluator};
use crate::event_counter::EventCounter;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;
const STATE_FORCED_OPEN: u8 = 3;

/// The four states a circuit breaker can be in (design §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
    ForcedOpen,
}

impl CircuitState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_CLOSED => Self::Closed,
            STATE_OPEN => Self::Open,
            STATE_HALF_OPEN => Self::HalfOpen,
            STATE_FORCED_OPEN => Self::ForcedOpen,
            _ => unreachable!("invalid circuit breaker state byte"),
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Self::Closed => STATE_CLOSED,
            Self::Open => STATE_OPEN,
            Self::HalfOpen => STATE_HALF_OPEN,
            Self::ForcedOpen => STATE_FORCED_OPEN,
        }
    }
}

/// A per-key circuit breaker: sliding-window counters driving a
/// CLOSED/OPEN/HALF_OPEN/FORCED_OPEN state machine.
///
/// Cloning shares the same underlying state (cheap `Arc` clone), matching
/// the teacher's `CircuitBreakerPolicy` clone semantics.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    state: Arc<AtomicU8>,
    opened_at_nanos: Arc<AtomicU64>,
    last_tick_nanos: Arc<AtomicU64>,
    half_open_last_trial_nanos: Arc<AtomicU64>,
    counter: Arc<EventCounter>,
    config: CircuitBreakerConfig,
    listeners: ListenerRegistry,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        let counter = Arc::new(EventCounter::new(
            config.counter_sliding_window,
            config.counter_update_interval,
            config.clock.clone(),
        ));
        let breaker = Self {
            name: name.into(),
            state: Arc::new(AtomicU8::new(STATE_CLOSED)),
            opened_at_nanos: Arc::new(AtomicU64::new(0)),
            last_tick_nanos: Arc::new(AtomicU64::new(0)),
            half_open_last_trial_nanos: Arc::new(AtomicU64::new(0)),
            counter,
            config,
            listeners: ListenerRegistry::default(),
        };
        breaker.listeners.dispatch_initialized(&breaker.name);
        breaker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_listener(&self, listener: Arc<dyn CircuitBreakerListener>) {
        self.listeners.add(listener);
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn now(&self) -> u64 {
        self.config.clock.now_nanos()
    }

    fn set_state(&self, new_state: CircuitState) {
        self.state.store(new_state.to_raw(), Ordering::Release);
        self.listeners.dispatch_state_changed(&self.name, new_state);
    }

    /// Returns `true` iff the caller may proceed with the request.
    pub fn try_request(&self) -> bool {
        loop {
            let raw = self.state.load(Ordering::Acquire);
            match raw {
                STATE_FORCED_OPEN => {
                    self.listeners.dispatch_request_rejected(&self.name);
                    return false;
                }
                STATE_CLOSED => return true,
                STATE_OPEN => {
                    let opened_at = self.opened_at_nanos.load(Ordering::Acquire);
                    let elapsed = self.now().saturating_sub(opened_at);
                    if elapsed < self.config.circuit_open_window.as_nanos() as u64 {
                        self.listeners.dispatch_request_rejected(&self.name);
                        return false;
                    }
                    match self.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            self.half_open_last_trial_nanos.store(self.now(), Ordering::Release);
                            tracing::info!(breaker = %self.name, "circuit breaker -> half-open");
                            self.listeners
                                .dispatch_state_changed(&self.name, CircuitState::HalfOpen);
                            return true;
                        }
                        Err(_) => continue,
                    }
                }
                STATE_HALF_OPEN => {
                    let now = self.now();
                    let last = self.half_open_last_trial_nanos.load(Ordering::Acquire);
                    let interval = self.config.trial_request_interval.as_nanos() as u64;
                    if now.saturating_sub(last) < interval {
                        self.listeners.dispatch_request_rejected(&self.name);
                        return false;
                    }
                    match self.half_open_last_trial_nanos.compare_exchange(
                        last,
                        now,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return true,
                        Err(_) => continue,
                    }
                }
                _ => unreachable!("invalid circuit breaker state"),
            }
        }
    }

    pub fn on_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                if self
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_CLOSED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.counter.reset();
                    tracing::info!(breaker = %self.name, "circuit breaker -> closed");
                    self.listeners.dispatch_state_changed(&self.name, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                self.counter.on_success();
                self.maybe_evaluate();
            }
            _ => {}
        }
    }

    pub fn on_failure(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                if self
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.opened_at_nanos.store(self.now(), Ordering::Release);
                    tracing::warn!(breaker = %self.name, "half-open trial failed -> open");
                    self.listeners.dispatch_state_changed(&self.name, CircuitState::Open);
                }
            }
            CircuitState::Closed => {
                self.counter.on_failure();
                self.maybe_evaluate();
            }
            _ => {}
        }
    }

    /// Classify a completed call via `rules` and record success/failure
    /// accordingly; an `IGNORE` or unmatched (`NEXT`) classification leaves
    /// the counters untouched.
    pub fn on_outcome(&self, outcome: &CallOutcome, rules: &RuleEvaluator) {
        match rules.classify(outcome) {
            Classification::Success => self.on_success(),
            Classification::Failure => self.on_failure(),
            Classification::Ignore | Classification::Next => {}
        }
    }

    /// Evaluate the CLOSED -> OPEN transition, but only once per
    /// `counter_update_interval` ("evaluated on counter update tick").
    fn maybe_evaluate(&self) {
        let now = self.now();
        let last = self.last_tick_nanos.load(Ordering::Acquire);
        let interval = self.config.counter_update_interval.as_nanos() as u64;
        if now.saturating_sub(last) < interval {
            return;
        }
        if self
            .last_tick_nanos
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return; // another thread is performing this tick's evaluation
        }

        let snapshot = self.counter.snapshot();
        self.listeners.dispatch_event_count_updated(&self.name, snapshot);

        if snapshot.total() < self.config.minimum_request_threshold {
            return;
        }
        let Ok(rate) = snapshot.failure_rate() else { return };
        if rate >= self.config.failure_rate_threshold
            && self
                .state
                .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.opened_at_nanos.store(now, Ordering::Release);
            self.counter.reset();
            tracing::error!(
                breaker = %self.name,
                rate,
                threshold = self.config.failure_rate_threshold,
                "circuit breaker -> open"
            );
            self.listeners.dispatch_state_changed(&self.name, CircuitState::Open);
        }
    }

    /// Administrative transition (design §6 `enter(state)`). `ForcedOpen` can
    /// only be entered/left this way; counters never drive it.
    pub fn enter(&self, state: CircuitState) {
        match state {
            CircuitState::Open => {
                self.opened_at_nanos.store(self.now(), Ordering::Release);
            }
            CircuitState::Closed => {
                self.counter.reset();
            }
            CircuitState::HalfOpen => {
                self.half_open_last_trial_nanos.store(self.now(), Ordering::Release);
            }
            CircuitState::ForcedOpen => {}
        }
        self.set_state(state);
    }

    pub fn force_open(&self) {
        self.enter(CircuitState::ForcedOpen);
    }

    pub fn clear_forced(&self) {
        if self.state() == CircuitState::ForcedOpen {
            self.enter(CircuitState::Closed);
        }
    }

    /// Idempotent; the breaker owns no timers, so this simply exists for
    /// interface symmetry with `EndpointGroup::close`.
    pub fn close(&self) {}
}
