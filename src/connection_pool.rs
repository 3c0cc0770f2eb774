//! Connection-pool listener hook (design component K).
//!
//! The pool itself lives in the (out-of-scope) HTTP transport layer; this
//! crate only defines the callback interface it reports through.

use crate::endpoint::Endpoint;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Reports connection lifecycle events for a single endpoint's pool.
pub trait ConnectionPoolListener: Send + Sync {
    fn connection_open(&self, _endpoint: &Endpoint) {}
    fn connection_closed(&self, _endpoint: &Endpoint) {}
}

/// Dispatches to every registered listener, isolating panics the same way
/// [`crate::circuit_breaker::listener::ListenerRegistry`] does.
#[derive(Clone, Default)]
pub struct ConnectionPoolListenerRegistry {
    listeners: Arc<Mutex<Vec<Arc<dyn ConnectionPoolListener>>>>,
}

impl ConnectionPoolListenerRegistry {
    pub fn add(&self, listener: Arc<dyn ConnectionPoolListener>) {
        self.listeners.lock().unwrap_or_else(|p| p.into_inner()).push(listener);
    }

    fn with_listeners<F: Fn(&Arc<dyn ConnectionPoolListener>)>(&self, f: F) {
        let guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        for listener in guard.iter() {
            let listener = listener.clone();
            if catch_unwind(AssertUnwindSafe(|| f(&listener))).is_err() {
                tracing::error!("connection pool listener panicked; suppressing");
            }
        }
    }

    pub fn dispatch_open(&self, endpoint: &Endpoint) {
        self.with_listeners(|l| l.connection_open(endpoint));
    }

    pub fn dispatch_closed(&self, endpoint: &Endpoint) {
        self.with_listeners(|l| l.connection_closed(endpoint));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    impl ConnectionPoolListener for Counting {
        fn connection_open(&self, _endpoint: &Endpoint) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }
        fn connection_closed(&self, _endpoint: &Endpoint) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicky;
    impl ConnectionPoolListener for Panicky {
        fn connection_open(&self, _endpoint: &Endpoint) {
            panic!("boom");
        }
    }

    #[test]
    fn dispatches_open_and_closed_to_every_listener() {
        let registry = ConnectionPoolListenerRegistry::default();
        let counting = Arc::new(Counting { opened: AtomicUsize::new(0), closed: AtomicUsize::new(0) });
        registry.add(counting.clone());
        let ep = Endpoint::of_hostname("svc");
        registry.dispatch_open(&ep);
        registry.dispatch_closed(&ep);
        assert_eq!(counting.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counting.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_panicking_listener_does_not_block_the_others() {
        let registry = ConnectionPoolListenerRegistry::default();
        registry.add(Arc::new(Panicky));
        let counting = Arc::new(Counting { opened: AtomicUsize::new(0), closed: AtomicUsize::new(0) });
        registry.add(counting.clone());
        registry.dispatch_open(&Endpoint::of_hostname("svc"));
        assert_eq!(counting.opened.load(Ordering::SeqCst), 1);
    }
}
