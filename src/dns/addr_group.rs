//! A/AAAA-backed endpoint group (design component G, "address group").

use super::cache::{CacheKey, DnsCache, QueryType};
use super::message::{RecordData, Resolver, ResolvedRecord};
use crate::clock::Clock;
use crate::endpoint::Endpoint;
use crate::endpoint_group::EndpointGroup;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const CNAME_HOP_LIMIT: usize = 16;
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Which address families to resolve and, when both are available, which one
/// wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedAddressTypes {
    Ipv4Only,
    Ipv6Only,
    Ipv4Preferred,
    Ipv6Preferred,
}

/// Resolves `name`'s A and/or AAAA records on a background refresh loop keyed
/// off the answers' TTL, publishing the result as a group of endpoints on
/// `port`.
pub struct AddressEndpointGroup {
    tx: watch::Sender<Arc<Vec<Endpoint>>>,
    rx: watch::Receiver<Arc<Vec<Endpoint>>>,
    shutdown_tx: watch::Sender<bool>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    selection_timeout: Duration,
}

impl AddressEndpointGroup {
    pub fn new(
        name: impl Into<String>,
        port: u16,
        address_types: ResolvedAddressTypes,
        resolver: Arc<Resolver>,
        cache: DnsCache,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (tx, rx) = watch::channel(Arc::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let name = name.into();
        let worker_tx = tx.clone();
        let negative_ttl = resolver.config().negative_ttl;
        let handle = tokio::spawn(async move {
            loop {
                let (endpoints, next_refresh) =
                    refresh_once(&name, port, address_types, &resolver, &cache, clock.as_ref(), negative_ttl).await;
                worker_tx.send_if_modified(|current| {
                    if **current == endpoints {
                        false
                    } else {
                        *current = Arc::new(endpoints);
                        true
                    }
                });

                tokio::select! {
                    _ = tokio::time::sleep(next_refresh) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Arc::new(Self {
            tx,
            rx,
            shutdown_tx,
            worker: tokio::sync::Mutex::new(Some(handle)),
            selection_timeout: Duration::from_secs(3),
        })
    }
}

async fn refresh_once(
    name: &str,
    port: u16,
    address_types: ResolvedAddressTypes,
    resolver: &Resolver,
    cache: &DnsCache,
    clock: &dyn Clock,
    negative_ttl: Duration,
) -> (Vec<Endpoint>, Duration) {
    let now = clock.now_nanos();
    let mut endpoints = Vec::new();

    let want_v4 = !matches!(address_types, ResolvedAddressTypes::Ipv6Only);
    let want_v6 = !matches!(address_types, ResolvedAddressTypes::Ipv4Only);

    let v4 = if want_v4 {
        resolve_cached(name, QueryType::A, resolver, cache, now, negative_ttl).await
    } else {
        Vec::new()
    };
    let v6 = if want_v6 {
        resolve_cached(name, QueryType::Aaaa, resolver, cache, now, negative_ttl).await
    } else {
        Vec::new()
    };

    let (primary, secondary) = match address_types {
        ResolvedAddressTypes::Ipv4Only => (v4, Vec::new()),
        ResolvedAddressTypes::Ipv6Only => (v6, Vec::new()),
        ResolvedAddressTypes::Ipv4Preferred => (v4, v6),
        ResolvedAddressTypes::Ipv6Preferred => (v6, v4),
    };
    // IPV4_PREFERRED/IPV6_PREFERRED means "both families, preferred family
    // first" — not "secondary family only when preferred is empty".
    let chosen: Vec<ResolvedRecord> = primary.into_iter().chain(secondary).collect();
    let min_ttl_secs = chosen.iter().map(|r| r.ttl).min();

    for record in chosen {
        if let Some(addr) = normalize_address(&record.data) {
            let endpoint = match addr {
                IpAddr::V4(v4) => Endpoint::of_ipv4(v4),
                IpAddr::V6(v6) => Endpoint::of_ipv6(v6),
            };
            endpoints.push(endpoint.with_port(port));
        }
    }

    let next_refresh = min_ttl_secs
        .map(|secs| Duration::from_secs(secs as u64))
        .unwrap_or(negative_ttl)
        .max(MIN_REFRESH_INTERVAL);

    (endpoints, next_refresh)
}

async fn resolve_cached(
    name: &str,
    query_type: QueryType,
    resolver: &Resolver,
    cache: &DnsCache,
    now_nanos: u64,
    negative_ttl: Duration,
) -> Vec<ResolvedRecord> {
    let key = CacheKey { name: name.to_string(), query_type };
    cache
        .get_or_resolve(key, now_nanos, negative_ttl, || async {
            resolve_following_cnames(resolver, name, query_type).await.unwrap_or_default()
        })
        .await
}

/// Follows a CNAME chain up to [`CNAME_HOP_LIMIT`] hops, returning the
/// terminal address records. Most recursive resolvers flatten the chain
/// themselves, but a resolver that returns a bare CNAME is followed here.
async fn resolve_following_cnames(
    resolver: &Resolver,
    name: &str,
    query_type: QueryType,
) -> Result<Vec<ResolvedRecord>, crate::error::CircuitMeshError> {
    let mut current = name.to_string();
    for _ in 0..CNAME_HOP_LIMIT {
        let records = resolver.resolve(&current, query_type).await?;
        let addresses: Vec<ResolvedRecord> =
            records.iter().filter(|r| matches!(r.data, RecordData::A(_) | RecordData::Aaaa(_))).cloned().collect();
        if !addresses.is_empty() {
            return Ok(addresses);
        }
        match records.iter().find_map(|r| match &r.data {
            RecordData::Cname(target) => Some(target.clone()),
            _ => None,
        }) {
            Some(target) => current = target,
            None => return Ok(Vec::new()),
        }
    }
    Err(crate::error::CircuitMeshError::resolution_failure(name, "CNAME chain exceeded 16 hops"))
}

/// Normalizes IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) down to their
/// IPv4 form; every other address passes through unchanged.
fn normalize_address(data: &RecordData) -> Option<IpAddr> {
    match data {
        RecordData::A(addr) => Some(IpAddr::V4(*addr)),
        RecordData::Aaaa(addr) => Some(match addr.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(*addr),
        }),
        _ => None,
    }
}

#[async_trait]
impl EndpointGroup for AddressEndpointGroup {
    fn snapshot(&self) -> Arc<Vec<Endpoint>> {
        self.rx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Vec<Endpoint>>> {
        self.tx.subscribe()
    }

    fn selection_timeout(&self) -> Duration {
        self.selection_timeout
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
