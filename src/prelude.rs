//! Convenience re-exports for the common cross-engine types.

pub use crate::circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerListener, CircuitBreakerMapping,
    CircuitState, Classification, MappingMode, RuleEvaluator,
};
pub use crate::clock::{Clock, ManualClock, MonotonicClock};
pub use crate::dns::{AddressEndpointGroup, DnsCache, ResolvedAddressTypes, Resolver, ResolverConfig, SrvEndpointGroup};
pub use crate::endpoint::{Endpoint, HostType};
pub use crate::endpoint_group::{DynamicEndpointGroup, EndpointGroup, EndpointSelector, OrElseGroup};
pub use crate::error::CircuitMeshError;
pub use crate::health::{HealthCheckConfig, HealthCheckStrategy, HealthCheckedEndpointGroup, ProbeTransport};
