//! Mutable base endpoint group (design component F).

use super::EndpointGroup;
use crate::endpoint::Endpoint;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Holds a mutable endpoint list behind a `watch` channel.
///
/// `set_endpoints` only notifies subscribers when the new list actually
/// differs from the current one (list equality), matching the design's
/// change-detected publish.
pub struct DynamicEndpointGroup {
    tx: watch::Sender<Arc<Vec<Endpoint>>>,
    rx: watch::Receiver<Arc<Vec<Endpoint>>>,
    selection_timeout: Duration,
}

impl DynamicEndpointGroup {
    pub fn new() -> Self {
        Self::with_selection_timeout(Duration::from_secs(3))
    }

    pub fn with_selection_timeout(selection_timeout: Duration) -> Self {
        let (tx, rx) = watch::channel(Arc::new(Vec::new()));
        Self { tx, rx, selection_timeout }
    }

    /// Atomically replaces the contents; fires subscribers iff the snapshot
    /// actually changed.
    pub fn set_endpoints(&self, endpoints: Vec<Endpoint>) {
        let next = Arc::new(endpoints);
        self.tx.send_if_modified(|current| {
            if **current == *next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
    }
}

impl Default for DynamicEndpointGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointGroup for DynamicEndpointGroup {
    fn snapshot(&self) -> Arc<Vec<Endpoint>> {
        self.rx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Vec<Endpoint>>> {
        self.tx.subscribe()
    }

    fn selection_timeout(&self) -> Duration {
        self.selection_timeout
    }
}
