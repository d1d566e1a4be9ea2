//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::AgentConfig;

/// Error type for configuration loading. Any of these is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("API key file is empty")]
    EmptyApiKey,
}

/// Load the agent configuration from a YAML file.
///
/// Unset fields take their serde defaults; a missing or unparseable file is
/// an error the caller should treat as fatal.
pub fn load_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: AgentConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Read the bearer token from the configured key file, trimming surrounding
/// whitespace. Empty content is an error so a truncated key file cannot turn
/// into anonymous API calls.
pub fn load_api_key(path: &Path) -> Result<String, ConfigError> {
    let raw = fs::read_to_string(path)?;
    let key = raw.trim();
    if key.is_empty() {
        return Err(ConfigError::EmptyApiKey);
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn full_config_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
vpsie:
  api_url: https://api.vpsie.com/v2
  api_key_file: /etc/vpsie-lb/api-key
  loadbalancer_id: lb-42
  poll_interval: 15s
envoy:
  config_path: /etc/envoy/conf
  binary_path: /opt/envoy/bin/envoy
  max_connections: 10000
logging:
  level: debug
  format: text
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.vpsie.loadbalancer_id, "lb-42");
        assert_eq!(config.vpsie.poll_interval, Duration::from_secs(15));
        assert_eq!(config.envoy.binary_path, "/opt/envoy/bin/envoy");
        assert_eq!(config.envoy.max_connections, 10_000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "vpsie:\n  loadbalancer_id: lb-1\n").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.vpsie.poll_interval, Duration::from_secs(30));
        assert_eq!(config.envoy.admin_address, "127.0.0.1:9901");
        assert_eq!(config.envoy.admin_port, 9901);
        assert_eq!(config.envoy.max_connections, 50_000);
        assert_eq!(config.envoy.binary_path, "/usr/bin/envoy");
        assert_eq!(config.envoy.pid_file, "/var/run/envoy.pid");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            load_config(Path::new("/nonexistent/agent.yaml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "vpsie: [not a mapping").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn api_key_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "  secret-token\n").unwrap();
        assert_eq!(load_api_key(file.path()).unwrap(), "secret-token");
    }

    #[test]
    fn empty_api_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "\n  \n").unwrap();
        assert!(matches!(load_api_key(file.path()), Err(ConfigError::EmptyApiKey)));
    }
}
