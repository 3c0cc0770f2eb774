//! HTTP transport boundary for health probes (design §4.I).
//!
//! The actual HTTP/1 client is deliberately kept out of the core per §1's
//! Non-goals; [`ProbeTransport`] is the seam a caller swaps to plug in their
//! own client. [`ReqwestProbeTransport`] is the default, usable-standalone
//! implementation.

use crate::error::CircuitMeshError;
use async_trait::async_trait;
use std::time::Duration;

/// A single probe attempt's request parameters, built by
/// [`super::context::HealthCheckContext`] from the endpoint plus
/// [`super::context::HealthCheckConfig`].
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub url: String,
    pub method: String,
    pub timeout: Duration,
}

/// `armeria-lphc: <long-poll-timeout-seconds>, <ping-interval-seconds>`,
/// parsed off a successful response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LongPollConfig {
    pub timeout: Duration,
    pub ping_interval: Duration,
}

impl LongPollConfig {
    /// Parses the `armeria-lphc` header value. A `0` ping-interval disables
    /// long-polling per §4.I ("a `0` value... disables long-polling").
    pub fn parse(value: &str) -> Option<Self> {
        let (timeout_s, ping_s) = value.split_once(',')?;
        let timeout_s: u64 = timeout_s.trim().parse().ok()?;
        let ping_s: u64 = ping_s.trim().parse().ok()?;
        if ping_s == 0 {
            return None;
        }
        Some(Self { timeout: Duration::from_secs(timeout_s), ping_interval: Duration::from_secs(ping_s) })
    }
}

/// The outcome of a single probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub long_poll: Option<LongPollConfig>,
}

#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeOutcome, CircuitMeshError>;
}

/// Default [`ProbeTransport`] built on `reqwest`.
///
/// `reqwest`'s public API surfaces only the terminal (non-1xx) response, so
/// this transport cannot observe individual in-flight `102 Processing` ping
/// frames the way a raw `hyper` upgrade hook could. Long-polling health is
/// instead approximated by re-issuing the probe every `ping_interval` once
/// `armeria-lphc` is seen and tracking consecutive successes — the endpoint
/// is treated as healthy on the same cadence the protocol describes, just
/// without reusing a single held-open connection across pings.
pub struct ReqwestProbeTransport {
    client: reqwest::Client,
}

impl ReqwestProbeTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestProbeTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl ProbeTransport for ReqwestProbeTransport {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeOutcome, CircuitMeshError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| CircuitMeshError::probe_failure(&request.url, e.to_string()))?;

        let response = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| CircuitMeshError::probe_failure(&request.url, e.to_string()))?;

        let status = response.status();
        let long_poll = response
            .headers()
            .get("armeria-lphc")
            .and_then(|v| v.to_str().ok())
            .and_then(LongPollConfig::parse);

        Ok(ProbeOutcome { healthy: status.is_success() || status.is_redirection(), long_poll })
    }
}
