//! Pre-auth access control: visibility resolution and IP/CIDR/domain/
//! subdomain allow-lists (spec §4.4), plus source-IP extraction (spec §4.4
//! "Source IP extraction").

use std::net::IpAddr;

use crate::models::service::{RouteLookupResult, ServiceAccessConfig, Visibility};

/// Extracted identity of the request's originator, independent of any
/// particular HTTP framework type.
#[derive(Debug, Clone)]
pub struct SourceIdentifier {
    pub ip: String,
    pub host: Option<String>,
}

/// Priority: RFC 7239 `Forwarded: for=` > `X-Forwarded-For` > socket peer >
/// the literal `"unknown"` (spec §4.4).
pub fn extract_source_ip(
    forwarded_header: Option<&str>,
    x_forwarded_for: Option<&str>,
    peer_addr: Option<&str>,
) -> String {
    if let Some(forwarded) = forwarded_header {
        if let Some(ip) = parse_forwarded_for(forwarded) {
            return ip;
        }
    }
    if let Some(xff) = x_forwarded_for {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return strip_port(trimmed);
            }
        }
    }
    if let Some(peer) = peer_addr {
        return strip_port(peer);
    }
    "unknown".to_string()
}

/// Parses the first `for=` entry in an RFC 7239 `Forwarded` header (closest
/// to the client), stripping quotes and `[...]` IPv6 brackets.
fn parse_forwarded_for(header: &str) -> Option<String> {
    let first_entry = header.split(',').next()?;
    for directive in first_entry.split(';') {
        let directive = directive.trim();
        if let Some(value) = directive.strip_prefix("for=") {
            let unquoted = value.trim_matches('"');
            return Some(strip_port(unquoted));
        }
    }
    None
}

/// Strips an IPv4 port (single colon) and unwraps `[ipv6]` or `[ipv6]:port`.
fn strip_port(value: &str) -> String {
    if let Some(rest) = value.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_string();
        }
    }
    match value.matches(':').count() {
        1 => value.split(':').next().unwrap_or(value).to_string(),
        _ => value.to_string(),
    }
}

/// Resolves effective visibility and, for PRIVATE routes, checks the source
/// against the effective `ServiceAccessConfig` (spec §4.4). A mismatch
/// returns `false` without distinguishing *why* — callers surface 404
/// either way, to avoid leaking existence of private endpoints.
pub fn is_source_allowed(
    route: &RouteLookupResult,
    source: &SourceIdentifier,
    platform_default_access: Option<&ServiceAccessConfig>,
) -> bool {
    let visibility = route
        .service()
        .effective_visibility(route.target_path(), route.endpoint());

    if visibility == Visibility::Public {
        return true;
    }

    let effective_config = route
        .service()
        .access_config
        .as_ref()
        .or(platform_default_access);

    let Some(config) = effective_config else {
        // PRIVATE with no access config configured anywhere denies by
        // default (deny-by-default on ambiguity).
        return false;
    };

    if config
        .allowed_ips
        .iter()
        .any(|entry| ip_matches(&source.ip, entry))
    {
        return true;
    }

    if let Some(host) = &source.host {
        if config.allowed_domains.iter().any(|d| d == host) {
            return true;
        }
        if config
            .allowed_subdomains
            .iter()
            .any(|pattern| subdomain_matches(pattern, host))
        {
            return true;
        }
    }

    false
}

/// Matches either a literal IP or a CIDR block.
fn ip_matches(ip: &str, entry: &str) -> bool {
    let Ok(candidate) = ip.parse::<IpAddr>() else {
        return false;
    };
    if let Some((network, prefix)) = entry.split_once('/') {
        let Ok(prefix_len) = prefix.parse::<u32>() else {
            return false;
        };
        let Ok(network_ip) = network.parse::<IpAddr>() else {
            return false;
        };
        return cidr_contains(network_ip, prefix_len, candidate);
    }
    entry.parse::<IpAddr>().map(|e| e == candidate).unwrap_or(false)
}

fn cidr_contains(network: IpAddr, prefix_len: u32, candidate: IpAddr) -> bool {
    match (network, candidate) {
        (IpAddr::V4(net), IpAddr::V4(cand)) => {
            if prefix_len > 32 {
                return false;
            }
            let mask = mask_u32(prefix_len);
            u32::from(net) & mask == u32::from(cand) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(cand)) => {
            if prefix_len > 128 {
                return false;
            }
            let mask = mask_u128(prefix_len);
            u128::from(net) & mask == u128::from(cand) & mask
        }
        _ => false,
    }
}

fn mask_u32(prefix_len: u32) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    }
}

fn mask_u128(prefix_len: u32) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - prefix_len)
    }
}

/// Glob `*.domain` subdomain match.
fn subdomain_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => host.ends_with(suffix) && host.len() > suffix.len() && host.as_bytes()[host.len() - suffix.len() - 1] == b'.',
        None => pattern == host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_header_takes_priority() {
        let ip = extract_source_ip(
            Some("for=198.51.100.1;proto=https"),
            Some("203.0.113.1"),
            Some("10.0.0.1:443"),
        );
        assert_eq!(ip, "198.51.100.1");
    }

    #[test]
    fn falls_back_to_xff_then_peer_then_unknown() {
        assert_eq!(
            extract_source_ip(None, Some("203.0.113.1, 10.0.0.1"), None),
            "203.0.113.1"
        );
        assert_eq!(extract_source_ip(None, None, Some("10.0.0.1:8080")), "10.0.0.1");
        assert_eq!(extract_source_ip(None, None, None), "unknown");
    }

    #[test]
    fn ipv6_brackets_are_stripped() {
        let ip = extract_source_ip(Some("for=\"[2001:db8::1]:443\""), None, None);
        assert_eq!(ip, "2001:db8::1");
    }

    #[test]
    fn cidr_match() {
        assert!(ip_matches("10.1.2.3", "10.0.0.0/8"));
        assert!(!ip_matches("192.0.2.5", "10.0.0.0/8"));
    }

    #[test]
    fn subdomain_glob_match() {
        assert!(subdomain_matches("*.example.com", "api.example.com"));
        assert!(!subdomain_matches("*.example.com", "example.com"));
        assert!(!subdomain_matches("*.example.com", "evilexample.com"));
    }
}
