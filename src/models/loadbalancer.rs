//! Load balancer root aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::errors::ValidationError;
use crate::models::{is_valid_id, Backend, HealthCheck, TlsConfig};

/// Front-end protocol terminated by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
}

impl Protocol {
    /// Wire name used in listener/stat-prefix naming.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
        }
    }
}

/// Balancing policy applied across healthy endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LbAlgorithm {
    RoundRobin,
    LeastRequest,
    Random,
    RingHash,
}

impl LbAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            LbAlgorithm::RoundRobin => "round_robin",
            LbAlgorithm::LeastRequest => "least_request",
            LbAlgorithm::Random => "random",
            LbAlgorithm::RingHash => "ring_hash",
        }
    }
}

/// Connection timeouts in seconds. Zero means the field is left to the
/// proxy's own default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Timeouts {
    #[serde(default)]
    pub connect: u64,
    #[serde(default)]
    pub idle: u64,
    #[serde(default)]
    pub request: u64,
}

/// Desired state of one load balancer as owned by the configuration service.
///
/// Instances are produced by decoding an API response and are never mutated
/// afterwards; [`LoadBalancer::validate`] gates every instance before it may
/// be rendered or persisted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub port: u32,
    pub algorithm: LbAlgorithm,
    pub backends: Vec<Backend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<Timeouts>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_connections: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl LoadBalancer {
    /// Validates the aggregate: basic fields, then backends (first failure
    /// wins), then TLS, then the health check.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_basic_fields()?;
        self.validate_backends()?;
        self.validate_tls_config()?;
        self.validate_health_check()?;
        Ok(())
    }

    fn validate_basic_fields(&self) -> Result<(), ValidationError> {
        if !is_valid_id(&self.id) {
            return Err(ValidationError::InvalidId);
        }
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(ValidationError::InvalidName);
        }
        if self.port == 0 || self.port > 65535 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }

    fn validate_backends(&self) -> Result<(), ValidationError> {
        if self.backends.is_empty() {
            return Err(ValidationError::NoBackends);
        }
        for backend in &self.backends {
            backend.validate()?;
        }
        Ok(())
    }

    fn validate_tls_config(&self) -> Result<(), ValidationError> {
        if self.protocol == Protocol::Https && self.tls_config.is_none() {
            return Err(ValidationError::MissingTlsConfig);
        }
        if let Some(tls) = &self.tls_config {
            tls.validate()?;
        }
        Ok(())
    }

    fn validate_health_check(&self) -> Result<(), ValidationError> {
        if let Some(hc) = &self.health_check {
            hc.validate()?;
        }
        Ok(())
    }
}
