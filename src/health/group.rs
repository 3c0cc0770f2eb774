//! Health-Checked Endpoint Group (design component J): wraps any
//! [`EndpointGroup`] with an independent per-endpoint probe loop and
//! publishes only the reachable subset.

use super::context::{HealthCheckConfig, HealthCheckContext};
use super::strategy::HealthCheckStrategy;
use super::transport::ProbeTransport;
use crate::endpoint::Endpoint;
use crate::endpoint_group::EndpointGroup;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct HealthCheckedEndpointGroup {
    tx: watch::Sender<Arc<Vec<Endpoint>>>,
    rx: watch::Receiver<Arc<Vec<Endpoint>>>,
    shutdown_tx: watch::Sender<bool>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    initial_ready_rx: watch::Receiver<bool>,
    selection_timeout: Duration,
}

impl HealthCheckedEndpointGroup {
    pub fn new(
        inner: Arc<dyn EndpointGroup>,
        transport: Arc<dyn ProbeTransport>,
        config: Arc<HealthCheckConfig>,
        strategy: HealthCheckStrategy,
    ) -> Arc<Self> {
        let (tx, rx) = watch::channel(Arc::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (initial_ready_tx, initial_ready_rx) = watch::channel(false);
        let threshold = config.healthy_threshold();

        let mut inner_rx = inner.subscribe();
        let worker_tx = tx.clone();

        let handle = tokio::spawn(async move {
            let mut contexts: HashMap<Endpoint, Arc<HealthCheckContext>> = HashMap::new();
            let mut included_at: HashMap<Endpoint, u64> = HashMap::new();
            let mut candidates: Vec<Endpoint> = Vec::new();
            let mut generation: u64 = 0;
            let mut snapshot: Vec<Endpoint> = inner_rx.borrow().as_ref().clone();
            let mut initial_ready_sent = false;

            let mut ticker = tokio::time::interval(Duration::from_millis(250));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                candidates = recompute_candidates(&snapshot, &candidates, &contexts, &strategy, threshold);
                reconcile_contexts(
                    &mut contexts,
                    &mut included_at,
                    &candidates,
                    &transport,
                    &config,
                    &mut generation,
                );
                publish(&worker_tx, &candidates, &contexts, threshold);

                if !initial_ready_sent
                    && generation >= 1
                    && candidates.iter().all(|ep| contexts.get(ep).map(|c| c.has_reported()).unwrap_or(false))
                {
                    let _ = initial_ready_tx.send(true);
                    initial_ready_sent = true;
                }

                tokio::select! {
                    changed = inner_rx.changed() => {
                        if changed.is_err() { break; }
                        snapshot = inner_rx.borrow().as_ref().clone();
                    }
                    _ = ticker.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            for context in contexts.values() {
                context.close();
            }
        });

        Arc::new(Self {
            tx,
            rx,
            shutdown_tx,
            worker: tokio::sync::Mutex::new(Some(handle)),
            initial_ready_rx,
            selection_timeout: Duration::from_secs(3),
        })
    }
}

/// Picks the next probed subset: endpoints still in `snapshot` and still
/// healthy are kept; unhealthy ones are swapped for an untried endpoint when
/// one is available (lazy expansion), and new slots are filled from the
/// remaining untried pool up to the strategy's target count. Pure function
/// over borrowed state, independent of the worker's scheduling.
fn recompute_candidates(
    snapshot: &[Endpoint],
    prev_candidates: &[Endpoint],
    contexts: &HashMap<Endpoint, Arc<HealthCheckContext>>,
    strategy: &HealthCheckStrategy,
    threshold: f64,
) -> Vec<Endpoint> {
    let target = strategy.target_count(snapshot.len());

    let mut retained = Vec::new();
    let mut to_replace = Vec::new();
    for ep in prev_candidates {
        if !snapshot.contains(ep) {
            continue;
        }
        let healthy = contexts.get(ep).map(|c| !c.has_reported() || c.is_healthy(threshold)).unwrap_or(true);
        if healthy {
            retained.push(ep.clone());
        } else {
            to_replace.push(ep.clone());
        }
    }

    let mut untried: Vec<Endpoint> =
        snapshot.iter().filter(|e| !retained.contains(e) && !to_replace.contains(e)).cloned().collect();

    let mut next = retained;
    for ep in to_replace {
        if next.len() >= target {
            break;
        }
        match untried.pop() {
            Some(replacement) => next.push(replacement),
            None => next.push(ep),
        }
    }
    while next.len() < target {
        match untried.pop() {
            Some(ep) => next.push(ep),
            None => break,
        }
    }
    if next.len() > target {
        next.truncate(target);
    }
    next
}

fn reconcile_contexts(
    contexts: &mut HashMap<Endpoint, Arc<HealthCheckContext>>,
    included_at: &mut HashMap<Endpoint, u64>,
    candidates: &[Endpoint],
    transport: &Arc<dyn ProbeTransport>,
    config: &Arc<HealthCheckConfig>,
    generation: &mut u64,
) {
    *generation += 1;
    let current_generation = *generation;

    for endpoint in candidates {
        match contexts.get(endpoint) {
            Some(context) => {
                context.increment_ref(current_generation);
                if let Some(prev) = included_at.get(endpoint) {
                    context.decrement_ref(*prev);
                }
            }
            None => {
                let context =
                    HealthCheckContext::spawn(endpoint.clone(), transport.clone(), config.clone(), current_generation);
                contexts.insert(endpoint.clone(), context);
            }
        }
        included_at.insert(endpoint.clone(), current_generation);
    }

    let dropped: Vec<Endpoint> =
        contexts.keys().filter(|ep| !candidates.contains(ep)).cloned().collect();
    for endpoint in dropped {
        if let Some(prev) = included_at.remove(&endpoint) {
            if let Some(context) = contexts.get(&endpoint) {
                context.decrement_ref(prev);
                if context.ref_count() == 0 {
                    context.close();
                    contexts.remove(&endpoint);
                }
            }
        }
    }
}

fn publish(
    tx: &watch::Sender<Arc<Vec<Endpoint>>>,
    candidates: &[Endpoint],
    contexts: &HashMap<Endpoint, Arc<HealthCheckContext>>,
    threshold: f64,
) {
    let healthy: Vec<Endpoint> = candidates
        .iter()
        .filter(|ep| contexts.get(*ep).map(|c| c.has_reported() && c.is_healthy(threshold)).unwrap_or(false))
        .cloned()
        .collect();
    tx.send_if_modified(|current| {
        if **current == healthy {
            false
        } else {
            *current = Arc::new(healthy);
            true
        }
    });
}

#[async_trait]
impl EndpointGroup for HealthCheckedEndpointGroup {
    fn snapshot(&self) -> Arc<Vec<Endpoint>> {
        self.rx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Vec<Endpoint>>> {
        self.tx.subscribe()
    }

    fn selection_timeout(&self) -> Duration {
        self.selection_timeout
    }

    /// Resolves once every context in the *initial* candidate set has
    /// reported a first health value, or [`Self::selection_timeout`] elapses
    /// — stronger than the default "first non-empty snapshot" rule, per
    /// design §4.J item 5.
    async fn when_ready(&self) -> Arc<Vec<Endpoint>> {
        let mut rx = self.initial_ready_rx.clone();
        if !*rx.borrow() {
            let wait = async {
                while rx.changed().await.is_ok() {
                    if *rx.borrow() {
                        return;
                    }
                }
            };
            let _ = tokio::time::timeout(self.selection_timeout, wait).await;
        }
        self.snapshot()
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
    use crate::error::CircuitMeshError;
    use crate::health::transport::{ProbeOutcome, ProbeRequest};
    use async_trait::async_trait as async_trait_attr;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    fn ep(name: &str) -> Endpoint {
        Endpoint::of_hostname(name)
    }

    #[test]
    fn all_strategy_keeps_every_snapshot_member() {
        let snapshot = vec![ep("a"), ep("b"), ep("c")];
        let next = recompute_candidates(&snapshot, &[], &HashMap::new(), &HealthCheckStrategy::All, 0.5);
        assert_eq!(next.len(), 3);
    }

    #[test]
    fn partial_strategy_caps_the_candidate_set() {
        let snapshot = vec![ep("a"), ep("b"), ep("c"), ep("d")];
        let strategy = HealthCheckStrategy::partial_max_count(2).unwrap();
        let next = recompute_candidates(&snapshot, &[], &HashMap::new(), &strategy, 0.5);
        assert_eq!(next.len(), 2);
    }

    #[test]
    fn an_endpoint_dropped_from_the_snapshot_is_dropped_from_candidates() {
        let prev = vec![ep("a"), ep("b")];
        let snapshot = vec![ep("a")];
        let next = recompute_candidates(&snapshot, &prev, &HashMap::new(), &HealthCheckStrategy::All, 0.5);
        assert_eq!(next, vec![ep("a")]);
    }

    struct ControlledTransport {
        healthy: StdMutex<HashSet<String>>,
    }

    #[async_trait_attr]
    impl ProbeTransport for ControlledTransport {
        async fn probe(&self, request: &ProbeRequest) -> Result<ProbeOutcome, CircuitMeshError> {
            let healthy = self.healthy.lock().unwrap().contains(&request.url);
            Ok(ProbeOutcome { healthy, long_poll: None })
        }
    }

    #[tokio::test]
    async fn publishes_only_endpoints_whose_probe_reported_healthy() {
        let inner = Arc::new(DynamicEndpointGroup::new());
        inner.set_endpoints(vec![ep("healthy"), ep("sick")]);

        let mut healthy_urls = HashSet::new();
        healthy_urls.insert("http://healthy/".to_string());
        let transport = Arc::new(ControlledTransport { healthy: StdMutex::new(healthy_urls) });

        let group = HealthCheckedEndpointGroup::new(
            inner,
            transport,
            Arc::new(HealthCheckConfig::default()),
            HealthCheckStrategy::all(),
        );

        let ready = tokio::time::timeout(Duration::from_secs(1), group.when_ready()).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].host(), "healthy");
        group.close();
    }
}
