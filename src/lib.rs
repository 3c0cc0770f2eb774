//! `circuit-mesh`: client-side resilience and service-discovery core.
//!
//! Three tightly coupled engines, each a thin library with no opinion about
//! the transport that calls it:
//!
//! - [`circuit_breaker`] — sliding-window failure counting, a per-key state
//!   machine, and a rule evaluator that classifies call outcomes.
//! - [`endpoint_group`] and [`dns`] — composable, observable sets of
//!   backend endpoints, including DNS-backed A/AAAA/SRV/TXT groups with
//!   TTL-driven refresh.
//! - [`health`] — wraps any endpoint group with an independent per-endpoint
//!   probe loop, publishing only the reachable subset.
//!
//! None of these depend on a specific HTTP/RPC client; the seams
//! ([`health::ProbeTransport`], [`connection_pool::ConnectionPoolListener`])
//! are where a transport plugs in.

#![forbid(unsafe_code)]

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod connection_pool;
pub mod dns;
pub mod endpoint;
pub mod endpoint_group;
pub mod error;
pub mod event_counter;
pub mod health;
pub mod prelude;

pub use error::CircuitMeshError;
