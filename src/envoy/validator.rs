//! Configuration validation via the Envoy binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("failed to run {binary}: {source}")]
    Exec {
        binary: PathBuf,
        source: std::io::Error,
    },

    #[error("config validation failed for {path}: {output}")]
    Rejected { path: PathBuf, output: String },
}

/// Runs `envoy --mode validate` against a rendered document. Spawns the
/// real binary, so callers should treat an absent binary as advisory rather
/// than fatal.
#[derive(Debug, Clone)]
pub struct BinaryValidator {
    envoy_binary: PathBuf,
}

impl BinaryValidator {
    pub fn new(envoy_binary: impl Into<PathBuf>) -> Self {
        Self {
            envoy_binary: envoy_binary.into(),
        }
    }

    /// Validate one configuration file, surfacing Envoy's combined output
    /// when it rejects the document.
    pub fn validate_config(&self, config_path: &Path) -> Result<(), ValidateError> {
        let output = Command::new(&self.envoy_binary)
            .arg("--mode")
            .arg("validate")
            .arg("-c")
            .arg(config_path)
            .output()
            .map_err(|source| ValidateError::Exec {
                binary: self.envoy_binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(ValidateError::Rejected {
                path: config_path.to_path_buf(),
                output: combined,
            });
        }
        Ok(())
    }

    pub fn validate_bootstrap(&self, bootstrap_path: &Path) -> Result<(), ValidateError> {
        self.validate_config(bootstrap_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_an_exec_error() {
        let validator = BinaryValidator::new("/nonexistent/envoy");
        assert!(matches!(
            validator.validate_config(Path::new("/dev/null")),
            Err(ValidateError::Exec { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn accepting_binary_passes() {
        let validator = BinaryValidator::new("/bin/true");
        validator.validate_config(Path::new("/dev/null")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn rejecting_binary_surfaces_failure() {
        let validator = BinaryValidator::new("/bin/false");
        assert!(matches!(
            validator.validate_config(Path::new("/dev/null")),
            Err(ValidateError::Rejected { .. })
        ));
    }
}
