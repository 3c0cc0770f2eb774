//! Per-endpoint health probe driver (design component I).

use super::transport::{LongPollConfig, ProbeRequest, ProbeTransport};
use crate::backoff::Backoff;
use crate::endpoint::Endpoint;
use crate::error::CircuitMeshError;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Tunables for a probe loop, shared read-only across every context a
/// [`super::group::HealthCheckedEndpointGroup`] owns.
#[derive(Clone)]
pub struct HealthCheckConfig {
    method: String,
    path: String,
    alt_port: Option<u16>,
    use_tls: bool,
    healthy_threshold: f64,
    per_attempt_timeout: Duration,
    backoff: Backoff,
}

impl HealthCheckConfig {
    pub fn builder() -> HealthCheckConfigBuilder {
        HealthCheckConfigBuilder::default()
    }

    pub fn healthy_threshold(&self) -> f64 {
        self.healthy_threshold
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        HealthCheckConfigBuilder::default().build().expect("default health check config is valid")
    }
}

pub struct HealthCheckConfigBuilder {
    method: String,
    path: String,
    alt_port: Option<u16>,
    use_tls: bool,
    healthy_threshold: f64,
    per_attempt_timeout: Duration,
    backoff: Backoff,
}

impl Default for HealthCheckConfigBuilder {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/".to_string(),
            alt_port: None,
            use_tls: false,
            healthy_threshold: 0.5,
            per_attempt_timeout: Duration::from_secs(2),
            backoff: Backoff::exponential(Duration::from_millis(500)).with_max(Duration::from_secs(30)),
        }
    }
}

impl HealthCheckConfigBuilder {
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn alt_port(mut self, port: u16) -> Self {
        self.alt_port = Some(port);
        self
    }

    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn healthy_threshold(mut self, threshold: f64) -> Self {
        self.healthy_threshold = threshold;
        self
    }

    pub fn per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build(self) -> Result<HealthCheckConfig, CircuitMeshError> {
        if !(self.healthy_threshold > 0.0 && self.healthy_threshold <= 1.0) {
            return Err(CircuitMeshError::config("healthy_threshold must be in (0, 1]"));
        }
        Ok(HealthCheckConfig {
            method: self.method,
            path: self.path,
            alt_port: self.alt_port,
            use_tls: self.use_tls,
            healthy_threshold: self.healthy_threshold,
            per_attempt_timeout: self.per_attempt_timeout,
            backoff: self.backoff,
        })
    }
}

/// Per-endpoint `{endpoint, lastHealth, refCount, scheduler, shutdown}`
/// (design §3). `refCount` is tracked per referencing generation (candidate
/// set version) rather than as a bare counter, so a decrement carrying a
/// stale generation can never cancel out a newer generation's reference.
pub struct HealthCheckContext {
    endpoint: Endpoint,
    health: Mutex<f64>,
    ref_generations: Mutex<BTreeSet<u64>>,
    reported: AtomicUsize,
    first_report_tx: watch::Sender<bool>,
    first_report_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HealthCheckContext {
    pub fn spawn(
        endpoint: Endpoint,
        transport: Arc<dyn ProbeTransport>,
        config: Arc<HealthCheckConfig>,
        generation: u64,
    ) -> Arc<Self> {
        let (first_report_tx, first_report_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let context = Arc::new(Self {
            endpoint: endpoint.clone(),
            health: Mutex::new(0.0),
            ref_generations: Mutex::new(BTreeSet::from([generation])),
            reported: AtomicUsize::new(0),
            first_report_tx,
            first_report_rx,
            shutdown_tx,
            worker: Mutex::new(None),
        });

        let worker_context = context.clone();
        let handle = tokio::spawn(probe_loop(endpoint, transport, config, worker_context, shutdown_rx));
        *context.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        context
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn health(&self) -> f64 {
        *self.health.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_healthy(&self, threshold: f64) -> bool {
        self.health() >= threshold
    }

    pub fn has_reported(&self) -> bool {
        *self.first_report_rx.borrow()
    }

    pub async fn await_first_report(&self) {
        let mut rx = self.first_report_rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }

    pub fn increment_ref(&self, generation: u64) {
        self.ref_generations.lock().unwrap_or_else(|p| p.into_inner()).insert(generation);
    }

    /// Drops `generation`'s reference. A generation that was never recorded
    /// (a stale or duplicate decrement) is simply ignored.
    pub fn decrement_ref(&self, generation: u64) {
        self.ref_generations.lock().unwrap_or_else(|p| p.into_inner()).remove(&generation);
    }

    pub fn ref_count(&self) -> usize {
        self.ref_generations.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut guard) = self.worker.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

fn build_request(endpoint: &Endpoint, config: &HealthCheckConfig, timeout: Duration) -> ProbeRequest {
    let scheme = if config.use_tls { "https" } else { "http" };
    let port = config.alt_port.unwrap_or_else(|| endpoint.port());
    let host = match endpoint.ip_addr() {
        Some(IpAddr::V6(_)) => format!("[{}]", endpoint.host()),
        _ => endpoint.host().to_string(),
    };
    let authority = if port == 0 { host } else { format!("{host}:{port}") };
    ProbeRequest { url: format!("{scheme}://{authority}{}", config.path), method: config.method.clone(), timeout }
}

async fn probe_loop(
    endpoint: Endpoint,
    transport: Arc<dyn ProbeTransport>,
    config: Arc<HealthCheckConfig>,
    context: Arc<HealthCheckContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempt: usize = 0;
    let mut long_poll: Option<LongPollConfig> = None;

    loop {
        let timeout = long_poll.map(|lp| lp.ping_interval * 2).unwrap_or(config.per_attempt_timeout);
        let request = build_request(&endpoint, &config, timeout);

        match transport.probe(&request).await {
            Ok(outcome) => {
                attempt = 0;
                long_poll = outcome.long_poll;
                *context.health.lock().unwrap_or_else(|p| p.into_inner()) = if outcome.healthy { 1.0 } else { 0.0 };
                tracing::debug!(endpoint = %endpoint, healthy = outcome.healthy, "health probe completed");
            }
            Err(error) => {
                attempt += 1;
                long_poll = None;
                *context.health.lock().unwrap_or_else(|p| p.into_inner()) = 0.0;
                tracing::warn!(endpoint = %endpoint, %error, "health probe failed");
            }
        }
        context.reported.fetch_add(1, Ordering::SeqCst);
        let _ = context.first_report_tx.send(true);

        let sleep_for = long_poll.map(|lp| lp.ping_interval).unwrap_or_else(|| config.backoff.delay(attempt.max(1)));
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::transport::ProbeOutcome;
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize as Counter;

    struct FakeTransport {
        healthy: std::sync::atomic::AtomicBool,
        probe_count: Counter,
    }

    impl FakeTransport {
        fn new(healthy: bool) -> Self {
            Self { healthy: std::sync::atomic::AtomicBool::new(healthy), probe_count: Counter::new(0) }
        }
    }

    #[async_trait]
    impl ProbeTransport for FakeTransport {
        async fn probe(&self, _request: &ProbeRequest) -> Result<ProbeOutcome, CircuitMeshError> {
            self.probe_count.fetch_add(1, Ordering::SeqCst);
            Ok(ProbeOutcome { healthy: self.healthy.load(Ordering::SeqCst), long_poll: None })
        }
    }

    #[tokio::test]
    async fn a_healthy_probe_reports_health_one() {
        let transport = Arc::new(FakeTransport::new(true));
        let context = HealthCheckContext::spawn(
            Endpoint::of_hostname("svc"),
            transport,
            Arc::new(HealthCheckConfig::default()),
            0,
        );
        context.await_first_report().await;
        assert_eq!(context.health(), 1.0);
        context.close();
    }

    #[tokio::test]
    async fn an_unhealthy_probe_reports_health_zero() {
        let transport = Arc::new(FakeTransport::new(false));
        let context = HealthCheckContext::spawn(
            Endpoint::of_hostname("svc"),
            transport,
            Arc::new(HealthCheckConfig::default()),
            0,
        );
        context.await_first_report().await;
        assert_eq!(context.health(), 0.0);
        context.close();
    }

    #[tokio::test]
    async fn ref_counts_track_generations_independently() {
        let transport = Arc::new(FakeTransport::new(true));
        let context = HealthCheckContext::spawn(
            Endpoint::of_hostname("svc"),
            transport,
            Arc::new(HealthCheckConfig::default()),
            1,
        );
        assert_eq!(context.ref_count(), 1);
        context.increment_ref(2);
        assert_eq!(context.ref_count(), 2);
        context.decrement_ref(1);
        assert_eq!(context.ref_count(), 1, "generation 2 still holds a reference");
        context.decrement_ref(99);
        assert_eq!(context.ref_count(), 1, "a decrement for an untracked generation is a no-op");
        context.decrement_ref(2);
        assert_eq!(context.ref_count(), 0);
        context.close();
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_the_probe_loop() {
        let transport = Arc::new(FakeTransport::new(true));
        let context = HealthCheckContext::spawn(
            Endpoint::of_hostname("svc"),
            transport.clone(),
            Arc::new(HealthCheckConfig::default()),
            0,
        );
        context.await_first_report().await;
        let probes_before_close = transport.probe_count.load(Ordering::SeqCst);
        context.close();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(transport.probe_count.load(Ordering::SeqCst), probes_before_close);
    }
}
