//! Cross-module health-check scenarios: rolling candidate replacement under
//! a partial strategy, and a group that never reports healthy timing out
//! `when_ready` rather than hanging forever.

use async_trait::async_trait;
use circuit_mesh::endpoint::Endpoint;
use circuit_mesh::endpoint_group::{DynamicEndpointGroup, EndpointGroup};
use circuit_mesh::error::CircuitMeshError;
use circuit_mesh::health::{
    HealthCheckConfig, HealthCheckStrategy, HealthCheckedEndpointGroup, ProbeTransport,
};
use circuit_mesh::health::transport::{LongPollConfig, ProbeOutcome, ProbeRequest};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ControlledTransport {
    healthy: Mutex<HashSet<String>>,
}

impl ControlledTransport {
    fn new() -> Self {
        Self { healthy: Mutex::new(HashSet::new()) }
    }

    fn mark_healthy(&self, url: &str) {
        self.healthy.lock().unwrap().insert(url.to_string());
    }

    fn mark_unhealthy(&self, url: &str) {
        self.healthy.lock().unwrap().remove(url);
    }
}

#[async_trait]
impl ProbeTransport for ControlledTransport {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeOutcome, CircuitMeshError> {
        let healthy = self.healthy.lock().unwrap().contains(&request.url);
        Ok(ProbeOutcome { healthy, long_poll: None })
    }
}

fn url_for(host: &str) -> String {
    format!("http://{host}/")
}

#[tokio::test]
async fn an_endpoint_that_turns_unhealthy_is_dropped_from_the_published_set() {
    let inner = Arc::new(DynamicEndpointGroup::new());
    inner.set_endpoints(vec![Endpoint::of_hostname("a"), Endpoint::of_hostname("b")]);

    let transport = Arc::new(ControlledTransport::new());
    transport.mark_healthy(&url_for("a"));
    transport.mark_healthy(&url_for("b"));

    let group = HealthCheckedEndpointGroup::new(
        inner,
        transport.clone(),
        Arc::new(HealthCheckConfig::default()),
        HealthCheckStrategy::all(),
    );

    let ready = tokio::time::timeout(Duration::from_secs(1), group.when_ready()).await.unwrap();
    assert_eq!(ready.len(), 2);

    transport.mark_unhealthy(&url_for("b"));
    let mut rx = group.subscribe();
    let dropped = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            rx.changed().await.unwrap();
            if rx.borrow().len() == 1 {
                return rx.borrow().clone();
            }
        }
    })
    .await
    .expect("b's unhealthy probe should republish a one-endpoint set within the polling window");
    assert_eq!(dropped[0].host(), "a");

    group.close();
}

#[tokio::test]
async fn partial_strategy_probes_only_the_configured_subset() {
    let inner = Arc::new(DynamicEndpointGroup::new());
    inner.set_endpoints(vec![
        Endpoint::of_hostname("a"),
        Endpoint::of_hostname("b"),
        Endpoint::of_hostname("c"),
        Endpoint::of_hostname("d"),
    ]);

    let transport = Arc::new(ControlledTransport::new());
    for host in ["a", "b", "c", "d"] {
        transport.mark_healthy(&url_for(host));
    }

    let strategy = HealthCheckStrategy::partial_max_count(2).unwrap();
    let group = HealthCheckedEndpointGroup::new(
        inner,
        transport,
        Arc::new(HealthCheckConfig::default()),
        strategy,
    );

    let ready = tokio::time::timeout(Duration::from_secs(1), group.when_ready()).await.unwrap();
    assert_eq!(ready.len(), 2, "only the strategy's target count should ever be published as healthy");
    group.close();
}

#[tokio::test(start_paused = true)]
async fn when_ready_gives_up_after_its_timeout_if_nothing_ever_reports_healthy() {
    let inner = Arc::new(DynamicEndpointGroup::new());
    inner.set_endpoints(vec![Endpoint::of_hostname("always-down")]);
    let transport = Arc::new(ControlledTransport::new()); // never marked healthy

    let group = HealthCheckedEndpointGroup::new(
        inner,
        transport,
        Arc::new(HealthCheckConfig::default()),
        HealthCheckStrategy::all(),
    );

    let handle = tokio::spawn({
        let group = group.clone();
        async move { group.when_ready().await }
    });
    tokio::time::advance(Duration::from_secs(4)).await;
    let ready = handle.await.unwrap();
    assert!(ready.is_empty(), "a permanently unhealthy endpoint must never appear in the published set");
    group.close();
}

struct LongPollTransport {
    probe_count: AtomicUsize,
}

impl LongPollTransport {
    fn new() -> Self {
        Self { probe_count: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ProbeTransport for LongPollTransport {
    async fn probe(&self, _request: &ProbeRequest) -> Result<ProbeOutcome, CircuitMeshError> {
        self.probe_count.fetch_add(1, Ordering::SeqCst);
        Ok(ProbeOutcome { healthy: true, long_poll: Some(LongPollConfig::parse("60, 1").unwrap()) })
    }
}

/// `armeria-lphc: 60,1`: the server keeps the same request open, sending a
/// `102 Processing` ping every second for up to 60s. A `ProbeTransport` can
/// only observe the terminal response (§4.I), so the probe loop schedules
/// its next probe `ping_interval` out rather than re-probing immediately;
/// this pins that no second probe fires before that interval elapses.
#[tokio::test(start_paused = true)]
async fn a_long_poll_response_is_not_re_probed_before_the_ping_interval_elapses() {
    let inner = Arc::new(DynamicEndpointGroup::new());
    inner.set_endpoints(vec![Endpoint::of_hostname("lphc")]);
    let transport = Arc::new(LongPollTransport::new());

    let group = HealthCheckedEndpointGroup::new(
        inner,
        transport.clone(),
        Arc::new(HealthCheckConfig::default()),
        HealthCheckStrategy::all(),
    );

    let ready = tokio::time::timeout(Duration::from_secs(1), group.when_ready()).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(transport.probe_count.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(900)).await;
    assert_eq!(
        transport.probe_count.load(Ordering::SeqCst),
        1,
        "no second probe should fire before the long-poll ping interval elapses"
    );
    assert_eq!(
        group.when_ready().await.len(),
        1,
        "health must remain reported healthy throughout the ping window"
    );

    group.close();
}
