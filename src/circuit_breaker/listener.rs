//! Circuit breaker listener callbacks (design §4.B, §6).

use super::state::CircuitState;
use crate::event_counter::EventCount;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Observer for circuit breaker lifecycle events.
///
/// Every callback is invoked exactly once per event, in the order the events
/// occurred; a panicking listener is caught and logged, never allowed to
/// poison the breaker's own state transitions.
pub trait CircuitBreakerListener: Send + Sync {
    fn on_initialized(&self, _breaker_name: &str) {}
    fn on_state_changed(&self, _breaker_name: &str, _new_state: CircuitState) {}
    fn on_event_count_updated(&self, _breaker_name: &str, _count: EventCount) {}
    fn on_request_rejected(&self, _breaker_name: &str) {}
}

/// Serializes dispatch to a set of listeners so that every listener observes
/// the same event order (design §5: "callbacks observe the same order on
/// every listener via per-breaker serialized dispatch").
#[derive(Clone, Default)]
pub(crate) struct ListenerRegistry {
    listeners: Arc<Mutex<Vec<Arc<dyn CircuitBreakerListener>>>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, listener: Arc<dyn CircuitBreakerListener>) {
        self.listeners.lock().unwrap_or_else(|p| p.into_inner()).push(listener);
    }

    fn with_listeners<F: Fn(&Arc<dyn CircuitBreakerListener>)>(&self, f: F) {
        let guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        for listener in guard.iter() {
            let listener = listener.clone();
            let result = catch_unwind(AssertUnwindSafe(|| f(&listener)));
            if result.is_err() {
                tracing::error!("circuit breaker listener panicked; suppressing");
            }
        }
    }

    pub(crate) fn dispatch_initialized(&self, name: &str) {
        self.with_listeners(|l| l.on_initialized(name));
    }

    pub(crate) fn dispatch_state_changed(&self, name: &str, new_state: CircuitState) {
        self.with_listeners(|l| l.on_state_changed(name, new_state));
    }

    pub(crate) fn dispatch_event_count_updated(&self, name: &str, count: EventCount) {
        self.with_listeners(|l| l.on_event_count_updated(name, count));
    }

    pub(crate) fn dispatch_request_rejected(&self, name: &str) {
        self.with_listeners(|l| l.on_request_rejected(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        initialized: AtomicUsize,
        rejected: AtomicUsize,
    }

    impl CircuitBreakerListener for Counting {
        fn on_initialized(&self, _name: &str) {
            self.initialized.fetch_add(1, Ordering::SeqCst);
        }
        fn on_request_rejected(&self, _name: &str) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicky;
    impl CircuitBreakerListener for Panicky {
        fn on_initialized(&self, _name: &str) {
            panic!("boom");
        }
    }

    #[test]
    fn dispatches_to_every_registered_listener() {
        let registry = ListenerRegistry::default();
        let counting = Arc::new(Counting {
            initialized: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        });
        registry.add(counting.clone());
        registry.dispatch_initialized("svc");
        registry.dispatch_request_rejected("svc");
        assert_eq!(counting.initialized.load(Ordering::SeqCst), 1);
        assert_eq!(counting.rejected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_panicking_listener_never_propagates() {
        let registry = ListenerRegistry::default();
        registry.add(Arc::new(Panicky));
        let counting = Arc::new(Counting {
            initialized: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        });
        registry.add(counting.clone());
        registry.dispatch_initialized("svc");
        // The panicky listener must not have prevented the well-behaved one from running.
        assert_eq!(counting.initialized.load(Ordering::SeqCst), 1);
    }
}
