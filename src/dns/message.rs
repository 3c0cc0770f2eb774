//! DNS wire resolution: UDP query/response via `hickory-proto`, with
//! per-attempt and whole-operation timeouts, ndots/search-domain ordering,
//! and injectable backoff (design §4.G "common skeleton").
//!
//! `hickory-resolver` is not used here: its caching and lookup machinery
//! doesn't expose the exact ndots-ordering, negative-TTL, and backoff
//! semantics this group needs, so only the wire codec (`hickory-proto`) is
//! taken from that ecosystem and the resolution loop is hand-rolled over a
//! raw `tokio::net::UdpSocket`.

use crate::backoff::Backoff;
use crate::dns::cache::QueryType;
use crate::error::CircuitMeshError;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// A single decoded answer record, independent of `hickory-proto`'s richer
/// record types.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub name: String,
    pub ttl: u32,
    pub data: RecordData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Srv { priority: u16, weight: u16, port: u16, target: String },
    Txt(Vec<u8>),
}

/// Resolver transport configuration.
#[derive(Clone)]
pub struct ResolverConfig {
    pub servers: Vec<SocketAddr>,
    pub search_domains: Vec<String>,
    pub ndots: u8,
    pub per_attempt_timeout: Duration,
    pub whole_timeout: Duration,
    pub backoff: Backoff,
    pub negative_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            servers: vec![
                SocketAddr::from(([8, 8, 8, 8], 53)),
                SocketAddr::from(([1, 1, 1, 1], 53)),
            ],
            search_domains: Vec::new(),
            ndots: 1,
            per_attempt_timeout: Duration::from_secs(2),
            whole_timeout: Duration::from_secs(5),
            backoff: Backoff::exponential(Duration::from_millis(200)).with_max(Duration::from_secs(30)),
            negative_ttl: Duration::from_secs(60),
        }
    }
}

impl ResolverConfig {
    /// Builds the ordered list of names to try, applying the `ndots` rule: a
    /// name with fewer embedded dots than `ndots` is tried with each search
    /// domain appended *first*, falling back to the bare name; a name that
    /// already meets `ndots` is tried bare first.
    pub fn candidate_names(&self, name: &str) -> Vec<String> {
        let bare = name.trim_end_matches('.').to_string();
        if self.search_domains.is_empty() {
            return vec![bare];
        }
        let dots = bare.chars().filter(|&c| c == '.').count() as u8;
        let with_search: Vec<String> =
            self.search_domains.iter().map(|domain| format!("{bare}.{domain}")).collect();
        if dots < self.ndots {
            let mut names = with_search;
            names.push(bare);
            names
        } else {
            let mut names = vec![bare];
            names.extend(with_search);
            names
        }
    }
}

/// Minimal UDP stub resolver: tries each configured server per candidate
/// name, retrying per `backoff` until `whole_timeout` elapses.
pub struct Resolver {
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Tries each ndots-ordered candidate name in turn, stopping at the
    /// first one that returns a non-empty answer set.
    pub async fn resolve(
        &self,
        name: &str,
        query_type: QueryType,
    ) -> Result<Vec<ResolvedRecord>, CircuitMeshError> {
        let deadline = tokio::time::Instant::now() + self.config.whole_timeout;
        let mut last_error = None;
        for candidate in self.config.candidate_names(name) {
            match self.resolve_one(&candidate, query_type, deadline).await {
                Ok(records) if !records.is_empty() => return Ok(records),
                Ok(_) => continue,
                Err(e) => last_error = Some(e),
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    async fn resolve_one(
        &self,
        name: &str,
        query_type: QueryType,
        deadline: tokio::time::Instant,
    ) -> Result<Vec<ResolvedRecord>, CircuitMeshError> {
        let record_type = to_record_type(query_type);
        let mut attempt: usize = 0;
        loop {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(CircuitMeshError::resolution_failure(name, "whole-operation timeout exceeded"));
            }
            let per_attempt = self.config.per_attempt_timeout.min(remaining);

            for server in &self.config.servers {
                match tokio::time::timeout(per_attempt, query_once(*server, name, record_type)).await {
                    Ok(Ok(records)) => return Ok(records),
                    Ok(Err(_)) | Err(_) => continue,
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(CircuitMeshError::resolution_failure(name, "no server answered before deadline"));
            }
            let delay = self.config.backoff.delay(attempt).min(remaining);
            tracing::debug!(name, attempt, delay_ms = delay.as_millis() as u64, "dns query retrying after backoff");
            tokio::time::sleep(delay).await;
        }
    }
}

fn to_record_type(query_type: QueryType) -> RecordType {
    match query_type {
        QueryType::A => RecordType::A,
        QueryType::Aaaa => RecordType::AAAA,
        QueryType::Srv => RecordType::SRV,
        QueryType::Txt => RecordType::TXT,
    }
}

async fn query_once(
    server: SocketAddr,
    name: &str,
    record_type: RecordType,
) -> Result<Vec<ResolvedRecord>, CircuitMeshError> {
    let fqdn = if name.ends_with('.') { name.to_string() } else { format!("{name}.") };
    let dns_name =
        Name::from_str(&fqdn).map_err(|e| CircuitMeshError::resolution_failure(name, e.to_string()))?;

    let mut message = Message::new();
    message.set_id(rand::random());
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(Query::query(dns_name, record_type));

    let request_bytes =
        message.to_bytes().map_err(|e| CircuitMeshError::resolution_failure(name, e.to_string()))?;

    let local_addr: SocketAddr =
        if server.is_ipv6() { ([0u16; 8], 0).into() } else { ([0u8; 4], 0).into() };
    let socket = UdpSocket::bind(local_addr)
        .await
        .map_err(|e| CircuitMeshError::resolution_failure(name, e.to_string()))?;
    socket.connect(server).await.map_err(|e| CircuitMeshError::resolution_failure(name, e.to_string()))?;
    socket.send(&request_bytes).await.map_err(|e| CircuitMeshError::resolution_failure(name, e.to_string()))?;

    let mut buf = [0u8; 4096];
    let len = socket.recv(&mut buf).await.map_err(|e| CircuitMeshError::resolution_failure(name, e.to_string()))?;

    let response =
        Message::from_bytes(&buf[..len]).map_err(|e| CircuitMeshError::resolution_failure(name, e.to_string()))?;
    if response.id() != message.id() {
        return Err(CircuitMeshError::resolution_failure(name, "response id did not match query id"));
    }

    Ok(response.answers().iter().filter_map(decode_record).collect())
}

fn decode_record(record: &Record) -> Option<ResolvedRecord> {
    let name = record.name().to_string();
    let ttl = record.ttl();
    let data = match record.data()? {
        RData::A(addr) => RecordData::A(addr.0),
        RData::AAAA(addr) => RecordData::Aaaa(addr.0),
        RData::CNAME(target) => RecordData::Cname(target.to_string()),
        RData::SRV(srv) => RecordData::Srv {
            priority: srv.priority(),
            weight: srv.weight(),
            port: srv.port(),
            target: srv.target().to_string(),
        },
        RData::TXT(txt) => {
            let joined: Vec<u8> = txt.txt_data().iter().flat_map(|segment| segment.iter().copied()).collect();
            RecordData::Txt(joined)
        }
        _ => return None,
    };
    Some(ResolvedRecord { name, ttl, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_search(domains: &[&str], ndots: u8) -> ResolverConfig {
        ResolverConfig {
            search_domains: domains.iter().map(|s| s.to_string()).collect(),
            ndots,
            ..ResolverConfig::default()
        }
    }

    #[test]
    fn without_search_domains_only_the_bare_name_is_tried() {
        let config = ResolverConfig::default();
        assert_eq!(config.candidate_names("svc"), vec!["svc".to_string()]);
    }

    #[test]
    fn a_short_name_tries_search_domains_before_the_bare_name() {
        let config = config_with_search(&["corp.internal"], 2);
        assert_eq!(
            config.candidate_names("svc"),
            vec!["svc.corp.internal".to_string(), "svc".to_string()]
        );
    }

    #[test]
    fn a_name_meeting_ndots_tries_itself_before_search_domains() {
        let config = config_with_search(&["corp.internal"], 1);
        assert_eq!(
            config.candidate_names("svc.prod"),
            vec!["svc.prod".to_string(), "svc.prod.corp.internal".to_string()]
        );
    }

    #[test]
    fn decode_record_extracts_a_records() {
        let name = Name::from_str("svc.example.com.").unwrap();
        let record = Record::from_rdata(name, 30, RData::A(hickory_proto::rr::rdata::A(Ipv4Addr::new(10, 0, 0, 1))));
        let decoded = decode_record(&record).unwrap();
        assert_eq!(decoded.ttl, 30);
        assert_eq!(decoded.data, RecordData::A(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn decode_record_extracts_srv_records() {
        let name = Name::from_str("_svc._tcp.example.com.").unwrap();
        let target = Name::from_str("backend-1.example.com.").unwrap();
        let record = Record::from_rdata(
            name,
            30,
            RData::SRV(hickory_proto::rr::rdata::SRV::new(10, 20, 8080, target)),
        );
        let decoded = decode_record(&record).unwrap();
        assert_eq!(
            decoded.data,
            RecordData::Srv { priority: 10, weight: 20, port: 8080, target: "backend-1.example.com.".into() }
        );
    }
}
