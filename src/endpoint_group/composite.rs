//! `a.orElse(b)` group composition (design §4.E).

use super::EndpointGroup;
use crate::endpoint::Endpoint;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A group whose snapshot is `a`'s whenever `a` is non-empty, else `b`'s.
///
/// Spawns a background task (the same shutdown-watch-plus-`JoinHandle`
/// pattern the control-plane transport uses to own its worker) that
/// republishes the merged snapshot whenever either side changes, so
/// `subscribe()` can hand out a plain `watch::Receiver` like every other
/// group.
pub struct OrElseGroup {
    tx: watch::Sender<Arc<Vec<Endpoint>>>,
    rx: watch::Receiver<Arc<Vec<Endpoint>>>,
    shutdown_tx: watch::Sender<bool>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl OrElseGroup {
    pub fn new(a: Arc<dyn EndpointGroup>, b: Arc<dyn EndpointGroup>) -> Arc<Self> {
        let initial = merged(&a.snapshot(), &b.snapshot());
        let (tx, rx) = watch::channel(initial);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();
        let worker_tx = tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    changed = a_rx.changed() => {
                        if changed.is_err() { break; }
                        let next = merged(&a_rx.borrow(), &b_rx.borrow());
                        worker_tx.send_replace(next);
                    }
                    changed = b_rx.changed() => {
                        if changed.is_err() { break; }
                        let next = merged(&a_rx.borrow(), &b_rx.borrow());
                        worker_tx.send_replace(next);
                    }
                }
            }
        });

        Arc::new(Self { tx, rx, shutdown_tx, worker: tokio::sync::Mutex::new(Some(handle)) })
    }
}

fn merged(a: &[Endpoint], b: &[Endpoint]) -> Arc<Vec<Endpoint>> {
    if !a.is_empty() {
        Arc::new(a.to_vec())
    } else {
        Arc::new(b.to_vec())
    }
}

#[async_trait]
impl EndpointGroup for OrElseGroup {
    fn snapshot(&self) -> Arc<Vec<Endpoint>> {
        self.rx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Vec<Endpoint>>> {
        self.tx.subscribe()
    }

    fn selection_timeout(&self) -> Duration {
        Duration::from_secs(3)
    }

    fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut guard) = self.worker.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint_group::DynamicEndpointGroup;

    #[tokio::test]
    async fn prefers_a_when_a_is_non_empty() {
        let a = Arc::new(DynamicEndpointGroup::new());
        let b = Arc::new(DynamicEndpointGroup::new());
        a.set_endpoints(vec![Endpoint::of_hostname("a")]);
        b.set_endpoints(vec![Endpoint::of_hostname("b")]);
        let group = OrElseGroup::new(a, b);
        tokio::task::yield_now().await;
        assert_eq!(group.snapshot()[0].host(), "a");
    }

    #[tokio::test]
    async fn falls_back_to_b_when_a_is_empty() {
        let a = Arc::new(DynamicEndpointGroup::new());
        let b = Arc::new(DynamicEndpointGroup::new());
        b.set_endpoints(vec![Endpoint::of_hostname("b")]);
        let group = OrElseGroup::new(a, b);
        tokio::task::yield_now().await;
        assert_eq!(group.snapshot()[0].host(), "b");
    }

    #[tokio::test]
    async fn republishes_when_the_active_side_changes() {
        let a = Arc::new(DynamicEndpointGroup::new());
        let b = Arc::new(DynamicEndpointGroup::new());
        let group = OrElseGroup::new(a.clone(), b);
        let mut rx = group.subscribe();
        assert!(group.snapshot().is_empty());

        a.set_endpoints(vec![Endpoint::of_hostname("a")]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow()[0].host(), "a");
    }
}
