//! Backend endpoint model.

use serde::{Deserialize, Serialize};

use crate::models::errors::ValidationError;
use crate::models::{is_valid_address, is_valid_id};

/// Observed health of a backend as reported by the configuration service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Up,
    Down,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A single addressable endpoint behind the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Backend {
    pub id: String,
    /// IPv4, IPv6, or RFC-1123 hostname.
    pub address: String,
    pub port: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub weight: u32,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "is_unknown")]
    pub status: BackendStatus,
}

fn is_zero(weight: &u32) -> bool {
    *weight == 0
}

fn is_unknown(status: &BackendStatus) -> bool {
    *status == BackendStatus::Unknown
}

impl Backend {
    /// Checks the backend's invariants, short-circuiting on the first failure.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_valid_id(&self.id) {
            return Err(ValidationError::InvalidBackendId);
        }
        if !is_valid_address(&self.address) {
            return Err(ValidationError::InvalidBackendAddress);
        }
        if self.port == 0 || self.port > 65535 {
            return Err(ValidationError::InvalidBackendPort);
        }
        Ok(())
    }

    /// A backend receives traffic only when it is enabled and observed up.
    pub fn is_healthy(&self) -> bool {
        self.enabled && self.status == BackendStatus::Up
    }
}
