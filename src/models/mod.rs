//! Domain model for load balancer desired state.
//!
//! Types mirror the configuration service's fetch payload. Construction is
//! decode-only; `validate()` on each type is the acceptance gate the
//! reconciliation loop runs before any configuration is materialised.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;

pub mod backend;
pub mod errors;
pub mod healthcheck;
pub mod loadbalancer;
pub mod tls;

pub use backend::{Backend, BackendStatus};
pub use errors::ValidationError;
pub use healthcheck::{HealthCheck, HealthCheckType};
pub use loadbalancer::{LbAlgorithm, LoadBalancer, Protocol, Timeouts};
pub use tls::{TlsConfig, TRUSTED_CERT_DIR};

static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern"));

/// RFC-1123 hostname: dot-separated labels of at most 63 characters that
/// start and end alphanumeric.
static HOSTNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("static pattern")
});

static PROBE_PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/[A-Za-z0-9/_\-.]*$").expect("static pattern"));

/// Resource identifiers: alphanumeric plus hyphen/underscore, at most 64
/// characters. Shared by load balancer and backend IDs.
pub(crate) fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && ID_REGEX.is_match(id)
}

/// Accepts an IPv4/IPv6 literal or an RFC-1123 hostname of at most 253
/// characters.
pub(crate) fn is_valid_address(address: &str) -> bool {
    if address.is_empty() {
        return false;
    }
    if address.parse::<IpAddr>().is_ok() {
        return true;
    }
    address.len() <= 253 && HOSTNAME_REGEX.is_match(address)
}

/// Probe paths are confined to a conservative character set because they are
/// rendered into a textual template.
pub(crate) fn is_valid_probe_path(path: &str) -> bool {
    PROBE_PATH_REGEX.is_match(path)
}
