//! DNS-layer scenarios that don't require a live resolver: ndots/search-domain
//! candidate ordering feeding a cache lookup pipeline, SRV-to-endpoint
//! weighting, and TXT-driven endpoint construction via a caller-supplied
//! parser — the data-shaping seams `AddressEndpointGroup`/`SrvEndpointGroup`/
//! `TxtEndpointGroup` sit on top of, exercised directly against their shared,
//! network-free building blocks.

use circuit_mesh::dns::{CacheKey, DnsCache, QueryType, RecordData, ResolvedRecord, ResolverConfig};
use circuit_mesh::endpoint::Endpoint;
use std::net::Ipv4Addr;
use std::time::Duration;

fn a_record(name: &str, ttl: u32, addr: Ipv4Addr) -> ResolvedRecord {
    ResolvedRecord { name: name.to_string(), ttl, data: RecordData::A(addr) }
}

#[test]
fn ndots_ordering_determines_which_cache_entry_a_short_name_lookup_hits_first() {
    let config = ResolverConfig {
        search_domains: vec!["svc.cluster.local".to_string()],
        ndots: 2,
        ..ResolverConfig::default()
    };
    let candidates = config.candidate_names("backend");
    assert_eq!(candidates, vec!["backend.svc.cluster.local".to_string(), "backend".to_string()]);

    // A resolver walking these candidates in order hits the search-qualified
    // cache entry first; simulate that walk directly against the cache.
    let cache = DnsCache::new();
    cache.put(
        CacheKey { name: "backend.svc.cluster.local".to_string(), query_type: QueryType::A },
        vec![a_record("backend.svc.cluster.local", 30, Ipv4Addr::new(10, 1, 2, 3))],
        0,
        Duration::from_secs(60),
    );

    let hit = candidates
        .iter()
        .find_map(|name| cache.get(&CacheKey { name: name.clone(), query_type: QueryType::A }, 0));
    let records = hit.expect("the search-qualified candidate should have been cached");
    assert_eq!(records[0].data, RecordData::A(Ipv4Addr::new(10, 1, 2, 3)));
}

#[test]
fn a_name_that_already_meets_ndots_never_consults_the_search_domain_at_all() {
    let config = ResolverConfig {
        search_domains: vec!["svc.cluster.local".to_string()],
        ndots: 1,
        ..ResolverConfig::default()
    };
    let candidates = config.candidate_names("backend.prod");

    let cache = DnsCache::new();
    cache.put(
        CacheKey { name: "backend.prod".to_string(), query_type: QueryType::A },
        vec![a_record("backend.prod", 30, Ipv4Addr::new(10, 9, 9, 9))],
        0,
        Duration::from_secs(60),
    );

    let hit = candidates
        .iter()
        .find_map(|name| cache.get(&CacheKey { name: name.clone(), query_type: QueryType::A }, 0));
    assert_eq!(hit.unwrap()[0].data, RecordData::A(Ipv4Addr::new(10, 9, 9, 9)));
    assert_eq!(candidates[0], "backend.prod", "the bare name must be tried before any search domain");
}

#[test]
fn a_name_that_never_resolves_is_cached_as_negative_and_stops_repeat_queries() {
    let cache = DnsCache::new();
    let key = CacheKey { name: "ghost.internal".to_string(), query_type: QueryType::A };

    // First lookup misses; caller would query the wire and get nothing back.
    assert!(cache.get(&key, 0).is_none());
    cache.put_negative(key.clone(), 0, Duration::from_secs(30));

    // Within the negative TTL, the cache reports a (still-empty) hit rather
    // than an uncached miss, so the caller never re-queries.
    let hit = cache.get(&key, 10_000_000_000).unwrap();
    assert!(hit.is_empty());

    // Past the negative TTL, it's a fresh miss again.
    assert!(cache.get(&key, 31_000_000_000).is_none());
}

#[test]
fn srv_records_become_endpoints_weighted_by_the_wire_weight_field() {
    let records = vec![
        ResolvedRecord {
            name: "_svc._tcp.example.com".into(),
            ttl: 30,
            data: RecordData::Srv { priority: 10, weight: 80, port: 9000, target: "primary.internal.".into() },
        },
        ResolvedRecord {
            name: "_svc._tcp.example.com".into(),
            ttl: 30,
            data: RecordData::Srv { priority: 20, weight: 20, port: 9000, target: "backup.internal.".into() },
        },
    ];

    let endpoints: Vec<Endpoint> = records
        .into_iter()
        .filter_map(|record| match record.data {
            RecordData::Srv { priority, weight, port, target } => {
                let authority = format!("{}:{}", target.trim_end_matches('.'), port);
                Endpoint::parse(&authority)
                    .ok()
                    .map(|ep| ep.with_weight(weight as u32).with_attr("srv.priority", priority.to_string()))
            }
            _ => None,
        })
        .collect();

    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0].weight(), 80);
    assert_eq!(endpoints[0].attribute("srv.priority"), Some("10"));
    assert_eq!(endpoints[1].host(), "backup.internal");
}

#[test]
fn txt_parser_can_reject_malformed_records_while_accepting_well_formed_ones() {
    let records = vec![
        ResolvedRecord { name: "svc".into(), ttl: 30, data: RecordData::Txt(b"endpoint=10.0.0.5:7000".to_vec()) },
        ResolvedRecord { name: "svc".into(), ttl: 30, data: RecordData::Txt(b"not-an-endpoint".to_vec()) },
    ];

    let parser = |bytes: &[u8]| -> Option<Endpoint> {
        let text = std::str::from_utf8(bytes).ok()?;
        Endpoint::parse(text.strip_prefix("endpoint=")?).ok()
    };

    let endpoints: Vec<Endpoint> = records
        .into_iter()
        .filter_map(|record| match record.data {
            RecordData::Txt(bytes) => parser(&bytes),
            _ => None,
        })
        .collect();

    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].port(), 7000);
}
