//! Pluggable endpoint selection (design component H).
//!
//! `RandomSelector` and `RoundRobinSelector` are the reference strategies the
//! design calls out; weighted round-robin, ring-hash, sticky, and slow-start
//! strategies are external plug-ins conforming to the same trait.

use super::EndpointGroup;
use crate::endpoint::Endpoint;
use crate::error::CircuitMeshError;
use async_trait::async_trait;
use rand::Rng;
use rand::rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A selection strategy over a group's current (or next) snapshot.
#[async_trait]
pub trait EndpointSelector: Send + Sync {
    /// Picks synchronously from an already-available snapshot.
    fn select_now(&self, endpoints: &[Endpoint]) -> Option<Endpoint>;

    /// Returns immediately if [`Self::select_now`] succeeds against the
    /// group's current snapshot; otherwise subscribes and resolves on the
    /// next snapshot that yields a pick, or fails with
    /// [`CircuitMeshError::EndpointSelectionTimeout`] at `deadline`.
    async fn select(
        &self,
        group: &dyn EndpointGroup,
        deadline: Duration,
    ) -> Result<Endpoint, CircuitMeshError> {
        if let Some(ep) = self.select_now(&group.snapshot()) {
            return Ok(ep);
        }
        let mut rx = group.subscribe();
        let wait_for_pick = async {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                if let Some(ep) = self.select_now(&rx.borrow()) {
                    return Some(ep);
                }
            }
        };
        match tokio::time::timeout(deadline, wait_for_pick).await {
            Ok(Some(ep)) => Ok(ep),
            _ => Err(CircuitMeshError::selection_timeout(deadline)),
        }
    }
}

/// Picks uniformly at random, ignoring weight.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl EndpointSelector for RandomSelector {
    fn select_now(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let idx = rng().random_range(0..endpoints.len());
        Some(endpoints[idx].clone())
    }
}

/// Cycles through the snapshot in order, ignoring weight.
///
/// The cursor is a plain `AtomicUsize` counter modulo the snapshot length at
/// pick time, so a shrinking/growing snapshot never panics, only reshuffles
/// which index the next pick lands on.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EndpointSelector for RoundRobinSelector {
    fn select_now(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Some(endpoints[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint_group::DynamicEndpointGroup;
    use std::sync::Arc;

    #[test]
    fn random_selector_returns_none_on_empty_snapshot() {
        assert_eq!(RandomSelector.select_now(&[]), None);
    }

    #[test]
    fn random_selector_picks_from_the_snapshot() {
        let endpoints = vec![Endpoint::of_hostname("a"), Endpoint::of_hostname("b")];
        let picked = RandomSelector.select_now(&endpoints).unwrap();
        assert!(endpoints.contains(&picked));
    }

    #[test]
    fn round_robin_cycles_through_every_endpoint() {
        let endpoints = vec![Endpoint::of_hostname("a"), Endpoint::of_hostname("b"), Endpoint::of_hostname("c")];
        let selector = RoundRobinSelector::new();
        let picks: Vec<_> = (0..6).map(|_| selector.select_now(&endpoints).unwrap().host().to_string()).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn select_returns_immediately_when_the_snapshot_is_ready() {
        let group = DynamicEndpointGroup::new();
        group.set_endpoints(vec![Endpoint::of_hostname("a")]);
        let selector = RoundRobinSelector::new();
        let ep = selector.select(&group, Duration::from_millis(50)).await.unwrap();
        assert_eq!(ep.host(), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn select_times_out_on_a_permanently_empty_group() {
        let group = Arc::new(DynamicEndpointGroup::new());
        let selector = RoundRobinSelector::new();
        let group2 = group.clone();
        let handle = tokio::spawn(async move { selector.select(group2.as_ref(), Duration::from_secs(1)).await });
        tokio::time::advance(Duration::from_secs(2)).await;
        let result = handle.await.unwrap();
        assert!(result.unwrap_err().is_selection_timeout());
    }

    #[tokio::test]
    async fn select_resolves_on_the_next_snapshot_update() {
        let group = Arc::new(DynamicEndpointGroup::new());
        let selector = Arc::new(RoundRobinSelector::new());
        let group2 = group.clone();
        let selector2 = selector.clone();
        let handle = tokio::spawn(async move { selector2.select(group2.as_ref(), Duration::from_secs(5)).await });
        tokio::task::yield_now().await;
        group.set_endpoints(vec![Endpoint::of_hostname("late")]);
        let ep = handle.await.unwrap().unwrap();
        assert_eq!(ep.host(), "late");
    }
}
