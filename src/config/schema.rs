//! Configuration schema definitions.
//!
//! This module defines the agent's local configuration structure. All types
//! derive Serde traits for deserialization from the YAML config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the control-plane agent.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    /// Configuration service connection settings.
    pub vpsie: VpsieSettings,

    /// Envoy data-plane settings (paths, admin endpoint, binary).
    pub envoy: EnvoySettings,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// VPSie API connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VpsieSettings {
    /// Base URL of the configuration service.
    pub api_url: String,

    /// File holding the bearer token, one line.
    pub api_key_file: String,

    /// Identifier of the load balancer this agent reconciles.
    pub loadbalancer_id: String,

    /// Reconciliation poll interval (e.g. "30s").
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for VpsieSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.vpsie.com/v1".to_string(),
            api_key_file: "/etc/vpsie-lb/api-key".to_string(),
            loadbalancer_id: String::new(),
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// Envoy-specific settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvoySettings {
    /// Directory receiving listeners.yaml and clusters.yaml; bootstrap.yaml
    /// is written next to it.
    pub config_path: String,

    /// Admin interface socket address.
    pub admin_address: String,

    /// Admin interface port.
    pub admin_port: u16,

    /// Envoy binary invoked for hot restarts and config validation.
    pub binary_path: String,

    /// File the running Envoy writes its pid to.
    pub pid_file: String,

    /// Value for the global downstream connection runtime limit.
    pub max_connections: u64,
}

impl Default for EnvoySettings {
    fn default() -> Self {
        Self {
            config_path: "/etc/envoy/conf".to_string(),
            admin_address: "127.0.0.1:9901".to_string(),
            admin_port: 9901,
            binary_path: "/usr/bin/envoy".to_string(),
            pid_file: "/var/run/envoy.pid".to_string(),
            max_connections: 50_000,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Output format, "json" or "text".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}
