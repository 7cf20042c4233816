//! Network-egress guard (SSRF protection).
//!
//! Outbound requests must never reach private address space, no matter what
//! a submitted URL's hostname resolves to. The guard lives at the DNS layer
//! of the shared outbound client: every lookup filters the resolved
//! addresses against a fixed blocklist and, on success, yields exactly one
//! literal IP so the connect step cannot race a second resolution
//! (TOCTOU). URLs whose host is already an IP literal bypass DNS entirely,
//! so the loader pre-checks those with [`blocked_literal`].

use std::error::Error as StdError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

/// Blocked ranges: loopback, RFC 1918 private, link-local, and their IPv6
/// counterparts (`::1/128`, `fc00::/7`, `fe80::/10`).
pub const BLOCKED_RANGES: &[&str] = &[
    "127.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

/// A resolved address fell inside the private-range blocklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ssrf protection: private IP {ip} is not allowed")]
pub struct EgressBlocked {
    /// The offending address.
    pub ip: IpAddr,
}

/// Returns true when `ip` falls inside any blocked range.
#[must_use]
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_v4(mapped);
            }
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 127
        || octets[0] == 10
        || (octets[0] == 172 && (octets[1] & 0xf0) == 16)
        || (octets[0] == 192 && octets[1] == 168)
        || (octets[0] == 169 && octets[1] == 254)
}

/// DNS resolver that refuses to yield private addresses.
///
/// Policy: if *any* resolved address is private the whole lookup fails with
/// [`EgressBlocked`]; mixed public/private results are not cherry-picked.
/// Otherwise only the first address is returned so the dial target is a
/// single literal IP.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardedResolver;

type BoxError = Box<dyn StdError + Send + Sync>;

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(resolve_public(host))
    }
}

/// Resolves `host` through the system resolver and applies the guard
/// policy.
async fn resolve_public(host: String) -> Result<Addrs, BoxError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0)).await?.collect();

    if addrs.is_empty() {
        return Err("no IP addresses found".into());
    }

    if let Some(private) = addrs.iter().find(|addr| is_private_ip(addr.ip())) {
        debug!(host = %host, ip = %private.ip(), "egress blocked");
        return Err(EgressBlocked { ip: private.ip() }.into());
    }

    let first = addrs[0];
    Ok(Box::new(std::iter::once(first)) as Addrs)
}

/// Pre-dispatch check for URLs whose host is an IP literal.
///
/// Literal hosts never hit DNS, so the resolver cannot intercept them.
#[must_use]
pub fn blocked_literal(url: &Url) -> Option<IpAddr> {
    let ip = match url.host() {
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
        _ => return None,
    };
    is_private_ip(ip).then_some(ip)
}

/// Recovers the blocked address from a failed send, if the failure was the
/// guard refusing the lookup. Walks the error source chain because reqwest
/// wraps resolver failures in several connector layers.
#[must_use]
pub fn blocked_ip(error: &reqwest::Error) -> Option<IpAddr> {
    let mut source = error.source();
    while let Some(current) = source {
        if let Some(blocked) = current.downcast_ref::<EgressBlocked>() {
            return Some(blocked.ip);
        }
        source = current.source();
    }
    None
}
