//! Outbound request guards for the API client.
//!
//! The agent runs inside customer VMs, so the base URL it talks to is
//! treated as hostile input: loopback, link-local, and private ranges are
//! refused outright and everything else must match the service's domain
//! allowlist. Resource IDs are escaped before they are spliced into paths.

use std::net::{Ipv4Addr, Ipv6Addr};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::{Host, Url};

use crate::models;

/// Domains the client may talk to; subdomains are accepted.
const ALLOWED_DOMAINS: [&str; 2] = ["api.vpsie.com", "vpsie.com"];

/// Unreserved characters stay literal when escaping a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local()
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() {
        return true;
    }
    let segments = ip.segments();
    // fd00::/8 (unique local) and fe80::/10 (link local).
    (segments[0] & 0xff00) == 0xfd00 || (segments[0] & 0xffc0) == 0xfe80
}

/// True when the URL's host is localhost, loopback, link-local, or inside a
/// private/ULA range.
pub(crate) fn is_private_or_localhost(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => is_private_v4(ip),
        Some(Host::Ipv6(ip)) => is_private_v6(ip),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            if domain == "localhost" || domain.starts_with("127.") {
                return true;
            }
            // A numeric domain that failed IP classification upstream, e.g.
            // "10.0.0.1" parsed as a domain by exotic URLs.
            if let Ok(ip) = domain.parse::<Ipv4Addr>() {
                return is_private_v4(ip);
            }
            false
        }
        None => true,
    }
}

/// True when the host equals, or is a subdomain of, an allowlisted domain.
pub(crate) fn is_allowed_domain(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    ALLOWED_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

/// Escape a resource ID for use as a URL path segment. Well-formed IDs pass
/// through untouched; anything else is percent-escaped.
pub(crate) fn sanitize_id(id: &str) -> String {
    if models::is_valid_id(id) {
        id.to_string()
    } else {
        utf8_percent_encode(id, PATH_SEGMENT).to_string()
    }
}
