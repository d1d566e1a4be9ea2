//! Active health probe model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::errors::ValidationError;
use crate::models::is_valid_probe_path;

/// Probe transport used for active health checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    Tcp,
    Http,
    Https,
}

/// Active health check configuration attached to a load balancer.
///
/// Ordered maps keep the serialized form stable so the reconciliation
/// fingerprint does not change between identical fetches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthCheck {
    #[serde(rename = "type")]
    pub check_type: HealthCheckType,
    /// Probe interval in seconds.
    pub interval: u32,
    /// Per-probe timeout in seconds; must be shorter than the interval.
    pub timeout: u32,
    /// Consecutive failures before a backend is marked unhealthy.
    pub unhealthy_threshold: u32,
    /// Consecutive successes before a backend is marked healthy again.
    pub healthy_threshold: u32,
    /// Request path, required for HTTP/HTTPS probes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Response statuses accepted as healthy; empty means the proxy default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_status: Vec<u16>,
}

impl HealthCheck {
    /// Checks the probe invariants, short-circuiting on the first failure.
    ///
    /// A stray `path` on a TCP probe is tolerated; the renderer ignores it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval == 0 {
            return Err(ValidationError::InvalidHealthCheckInterval);
        }
        if self.timeout == 0 {
            return Err(ValidationError::InvalidHealthCheckTimeout);
        }
        if self.timeout >= self.interval {
            return Err(ValidationError::HealthCheckTimeoutTooLong);
        }
        if self.unhealthy_threshold == 0 {
            return Err(ValidationError::InvalidUnhealthyThreshold);
        }
        if self.healthy_threshold == 0 {
            return Err(ValidationError::InvalidHealthyThreshold);
        }
        if self.is_http_based() {
            if self.path.is_empty() {
                return Err(ValidationError::MissingHealthCheckPath);
            }
            if !is_valid_probe_path(&self.path) {
                return Err(ValidationError::InvalidHealthCheckPath);
            }
        }
        Ok(())
    }

    pub fn is_http_based(&self) -> bool {
        matches!(self.check_type, HealthCheckType::Http | HealthCheckType::Https)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_check() -> HealthCheck {
        HealthCheck {
            check_type: HealthCheckType::Http,
            interval: 10,
            timeout: 5,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            path: "/health".into(),
            headers: BTreeMap::new(),
            expected_status: vec![200],
        }
    }

    #[test]
    fn valid_http_check_passes() {
        assert!(http_check().validate().is_ok());
    }

    #[test]
    fn timeout_must_be_shorter_than_interval() {
        let mut hc = http_check();
        hc.timeout = 10;
        assert_eq!(hc.validate(), Err(ValidationError::HealthCheckTimeoutTooLong));
        hc.timeout = 15;
        assert_eq!(hc.validate(), Err(ValidationError::HealthCheckTimeoutTooLong));
    }

    #[test]
    fn zero_fields_rejected() {
        let mut hc = http_check();
        hc.interval = 0;
        assert_eq!(hc.validate(), Err(ValidationError::InvalidHealthCheckInterval));

        let mut hc = http_check();
        hc.timeout = 0;
        assert_eq!(hc.validate(), Err(ValidationError::InvalidHealthCheckTimeout));

        let mut hc = http_check();
        hc.unhealthy_threshold = 0;
        assert_eq!(hc.validate(), Err(ValidationError::InvalidUnhealthyThreshold));

        let mut hc = http_check();
        hc.healthy_threshold = 0;
        assert_eq!(hc.validate(), Err(ValidationError::InvalidHealthyThreshold));
    }

    #[test]
    fn http_check_requires_path() {
        let mut hc = http_check();
        hc.path = String::new();
        assert_eq!(hc.validate(), Err(ValidationError::MissingHealthCheckPath));
    }

    #[test]
    fn malformed_path_rejected() {
        let mut hc = http_check();
        hc.path = "health".into();
        assert_eq!(hc.validate(), Err(ValidationError::InvalidHealthCheckPath));
        hc.path = "/health{{}}".into();
        assert_eq!(hc.validate(), Err(ValidationError::InvalidHealthCheckPath));
    }

    #[test]
    fn tcp_check_tolerates_stray_path() {
        let hc = HealthCheck {
            check_type: HealthCheckType::Tcp,
            interval: 10,
            timeout: 2,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            path: "/ignored".into(),
            headers: BTreeMap::new(),
            expected_status: Vec::new(),
        };
        assert!(hc.validate().is_ok());
    }
}
