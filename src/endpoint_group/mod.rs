//! Endpoint Group Engine (design components E, F, H): observable sets of
//! backend endpoints, a mutable base implementation, composition, and
//! pluggable selection.

pub mod composite;
pub mod dynamic;
pub mod selector;

use crate::endpoint::Endpoint;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub use composite::OrElseGroup;
pub use dynamic::DynamicEndpointGroup;
pub use selector::{EndpointSelector, RandomSelector, RoundRobinSelector};

/// An observable, closeable collection of backend endpoints.
///
/// `subscribe` hands out a `tokio::sync::watch` receiver: every subscriber
/// always observes the *latest* snapshot and snapshots are never delivered
/// out of order, but a slow subscriber may skip intermediate ones — exactly
/// the "totally ordered, never skips backward" guarantee this engine needs,
/// without a bespoke listener registry.
#[async_trait]
pub trait EndpointGroup: Send + Sync {
    /// Current snapshot; may be empty.
    fn snapshot(&self) -> Arc<Vec<Endpoint>>;

    /// A receiver that observes every future snapshot, starting from the
    /// current one.
    fn subscribe(&self) -> watch::Receiver<Arc<Vec<Endpoint>>>;

    /// How long [`Self::when_ready`] waits before giving up on a non-empty
    /// snapshot. Default matches the design's default selection timeout.
    fn selection_timeout(&self) -> Duration {
        Duration::from_secs(3)
    }

    /// Resolves with the first non-empty snapshot, or the latest snapshot
    /// (possibly still empty) once [`Self::selection_timeout`] elapses.
    async fn when_ready(&self) -> Arc<Vec<Endpoint>> {
        let mut rx = self.subscribe();
        if !rx.borrow().is_empty() {
            return rx.borrow().clone();
        }
        let wait_for_non_empty = async {
            loop {
                if rx.changed().await.is_err() {
                    return rx.borrow().clone();
                }
                if !rx.borrow().is_empty() {
                    return rx.borrow().clone();
                }
            }
        };
        tokio::time::timeout(self.selection_timeout(), wait_for_non_empty)
            .await
            .unwrap_or_else(|_| self.snapshot())
    }

    /// Idempotent; cancels internal timers/subscriptions and releases
    /// resources. Default no-op for groups that own nothing closeable.
    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;

    struct StaticGroup(Arc<Vec<Endpoint>>, watch::Sender<Arc<Vec<Endpoint>>>);

    impl StaticGroup {
        fn new(endpoints: Vec<Endpoint>) -> Self {
            let snapshot = Arc::new(endpoints);
            let (tx, _rx) = watch::channel(snapshot.clone());
            Self(snapshot, tx)
        }
    }

    #[async_trait]
    impl EndpointGroup for StaticGroup {
        fn snapshot(&self) -> Arc<Vec<Endpoint>> {
            self.0.clone()
        }
        fn subscribe(&self) -> watch::Receiver<Arc<Vec<Endpoint>>> {
            self.1.subscribe()
        }
    }

    #[tokio::test]
    async fn when_ready_resolves_immediately_for_a_non_empty_group() {
        let group = StaticGroup::new(vec![Endpoint::of_hostname("a")]);
        let ready = tokio::time::timeout(Duration::from_millis(50), group.when_ready()).await.unwrap();
        assert_eq!(ready.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn when_ready_times_out_on_a_permanently_empty_group() {
        let group = StaticGroup::new(vec![]);
        let handle = tokio::spawn(async move { group.when_ready().await });
        tokio::time::advance(Duration::from_secs(4)).await;
        let ready = handle.await.unwrap();
        assert!(ready.is_empty());
    }
}
