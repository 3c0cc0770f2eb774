//! Health-checked endpoint groups (design components I, J).

pub mod context;
pub mod group;
pub mod strategy;
pub mod transport;

pub use context::{HealthCheckConfig, HealthCheckConfigBuilder, HealthCheckContext};
pub use group::HealthCheckedEndpointGroup;
pub use strategy::{HealthCheckStrategy, PartialBound};
pub use transport::{LongPollConfig, ProbeOutcome, ProbeRequest, ProbeTransport, ReqwestProbeTransport};
