//! Immutable endpoint value type (design component E).

use crate::error::CircuitMeshError;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// What kind of authority [`Endpoint::host`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostType {
    Hostname,
    Ipv4,
    Ipv6,
    /// References another named endpoint group rather than a network address.
    GroupRef,
}

const DEFAULT_WEIGHT: u32 = 1000;

/// An immutable backend address plus selection metadata.
///
/// Two endpoints are equal iff every field matches, including a resolved
/// `ip_addr` recorded via [`Endpoint::with_ip_addr`] — so a hostname endpoint
/// resolved to two different addresses compares unequal, which is exactly
/// what lets a selector treat them as distinct pool members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host_type: HostType,
    host: Arc<str>,
    ip_addr: Option<IpAddr>,
    port: u16,
    weight: u32,
    attributes: Arc<BTreeMap<String, String>>,
}

impl Endpoint {
    pub fn of_hostname(host: impl Into<Arc<str>>) -> Self {
        Self::new(HostType::Hostname, host.into(), None, 0, DEFAULT_WEIGHT)
    }

    pub fn of_ipv4(addr: Ipv4Addr) -> Self {
        Self::new(HostType::Ipv4, addr.to_string().into(), Some(IpAddr::V4(addr)), 0, DEFAULT_WEIGHT)
    }

    pub fn of_ipv6(addr: Ipv6Addr) -> Self {
        Self::new(HostType::Ipv6, addr.to_string().into(), Some(IpAddr::V6(addr)), 0, DEFAULT_WEIGHT)
    }

    pub fn group_ref(name: impl Into<Arc<str>>) -> Self {
        Self::new(HostType::GroupRef, name.into(), None, 0, DEFAULT_WEIGHT)
    }

    fn new(host_type: HostType, host: Arc<str>, ip_addr: Option<IpAddr>, port: u16, weight: u32) -> Self {
        Self { host_type, host, ip_addr, port, weight, attributes: Arc::new(BTreeMap::new()) }
    }

    /// Parses `host[:port]`, an IPv4 literal, a bracketed IPv6 literal, or a
    /// `group:<name>` reference.
    pub fn parse(authority: &str) -> Result<Self, CircuitMeshError> {
        if let Some(name) = authority.strip_prefix("group:") {
            if name.is_empty() {
                return Err(CircuitMeshError::config("group reference must name a group"));
            }
            return Ok(Self::group_ref(name));
        }

        if let Some(rest) = authority.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| CircuitMeshError::config("unterminated '[' in IPv6 authority"))?;
            let (host_part, trailer) = rest.split_at(close);
            let addr: Ipv6Addr = host_part
                .parse()
                .map_err(|_| CircuitMeshError::config(format!("invalid IPv6 literal: {host_part}")))?;
            let port = parse_port_suffix(&trailer[1..])?;
            let mut ep = Self::of_ipv6(addr);
            ep.port = port;
            return Ok(ep);
        }

        if let Ok(addr) = authority.parse::<Ipv4Addr>() {
            return Ok(Self::of_ipv4(addr));
        }
        if let Ok(addr) = authority.parse::<Ipv6Addr>() {
            return Ok(Self::of_ipv6(addr));
        }

        match authority.rsplit_once(':') {
            Some((host, port_str)) if !host.is_empty() && !host.contains(':') => {
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| CircuitMeshError::config(format!("invalid port: {port_str}")))?;
                let mut ep = match host.parse::<Ipv4Addr>() {
                    Ok(addr) => Self::of_ipv4(addr),
                    Err(_) => Self::of_hostname(host),
                };
                ep.port = port;
                Ok(ep)
            }
            _ => {
                if authority.is_empty() {
                    return Err(CircuitMeshError::config("empty authority"));
                }
                Ok(Self::of_hostname(authority))
            }
        }
    }

    pub fn host_type(&self) -> HostType {
        self.host_type
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ip_addr(&self) -> Option<IpAddr> {
        self.ip_addr
    }

    /// `0` means unspecified.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Attaches a resolved address to a (typically hostname-typed) endpoint
    /// without otherwise altering its identity.
    pub fn with_ip_addr(mut self, addr: IpAddr) -> Self {
        self.ip_addr = Some(addr);
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.attributes).insert(key.into(), value.into());
        self
    }

    /// Renders the host (and port, if non-zero) as a wire authority, bracketing
    /// IPv6 literals. `default_port` (e.g. 80 for `http`, 443 for `https`) is
    /// omitted rather than rendered explicitly.
    pub fn authority(&self, default_port: Option<u16>) -> String {
        let omit_port = self.port == 0 || Some(self.port) == default_port;
        let host = match self.host_type {
            HostType::GroupRef => return format!("group:{}", self.host),
            HostType::Ipv6 => format!("[{}]", self.host),
            HostType::Hostname | HostType::Ipv4 => self.host.to_string(),
        };
        if omit_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authority(None))
    }
}

fn parse_port_suffix(suffix: &str) -> Result<u16, CircuitMeshError> {
    if suffix.is_empty() {
        return Ok(0);
    }
    let digits = suffix
        .strip_prefix(':')
        .ok_or_else(|| CircuitMeshError::config(format!("expected ':port' after ']', found '{suffix}'")))?;
    digits.parse().map_err(|_| CircuitMeshError::config(format!("invalid port: {digits}")))
}
