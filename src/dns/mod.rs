//! DNS-backed endpoint groups (design component G).
//!
//! [`AddressEndpointGroup`](addr_group::AddressEndpointGroup) resolves A/AAAA
//! records, [`SrvEndpointGroup`](srv_group::SrvEndpointGroup) resolves SRV
//! records into weighted endpoints, and
//! [`TxtEndpointGroup`](txt_group::TxtEndpointGroup) hands TXT record bytes to
//! a caller-supplied parser. All three share the [`message::Resolver`] wire
//! client and the [`cache::DnsCache`] negative-TTL cache, and publish through
//! the same [`crate::endpoint_group::EndpointGroup`] trait as any other
//! group.

pub mod addr_group;
pub mod cache;
pub mod message;
pub mod srv_group;
pub mod txt_group;

pub use addr_group::{AddressEndpointGroup, ResolvedAddressTypes};
pub use cache::{CacheKey, DnsCache, QueryType};
pub use message::{RecordData, Resolver, ResolverConfig, ResolvedRecord};
pub use srv_group::SrvEndpointGroup;
pub use txt_group::TxtEndpointGroup;
