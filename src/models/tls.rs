//! TLS terminator material.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::errors::ValidationError;

/// Directory under which all certificate material must live. Paths are
/// re-checked after symlink resolution so a link inside the directory cannot
/// point at a file outside it.
pub const TRUSTED_CERT_DIR: &str = "/etc/vpsie-lb/certs";

const VALID_TLS_VERSIONS: [&str; 2] = ["TLSv1.2", "TLSv1.3"];

/// TLS configuration for an HTTPS listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    pub certificate_path: String,
    pub private_key_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<String>,
    /// Minimum protocol version, `TLSv1.2` or `TLSv1.3`.
    pub min_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cipher_suites: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
}

impl TlsConfig {
    /// Checks field invariants and confines every referenced path to the
    /// trusted certificate directory.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.certificate_path.is_empty() {
            return Err(ValidationError::MissingCertificate);
        }
        if self.private_key_path.is_empty() {
            return Err(ValidationError::MissingPrivateKey);
        }
        if !VALID_TLS_VERSIONS.contains(&self.min_version.as_str()) {
            return Err(ValidationError::InvalidTlsVersion);
        }
        if let Some(max) = &self.max_version {
            if !VALID_TLS_VERSIONS.contains(&max.as_str()) {
                return Err(ValidationError::InvalidTlsVersion);
            }
        }

        let trusted = Path::new(TRUSTED_CERT_DIR);
        validate_material_path(&self.certificate_path, trusted)?;
        validate_material_path(&self.private_key_path, trusted)?;
        if let Some(ca) = &self.ca_cert_path {
            validate_material_path(ca, trusted)?;
        }
        Ok(())
    }

    /// ALPN protocols for the listener, falling back to the h2 + http/1.1
    /// default when the service supplies none.
    pub fn alpn_or_default(&self) -> Vec<String> {
        if self.alpn.is_empty() {
            vec!["h2".to_string(), "http/1.1".to_string()]
        } else {
            self.alpn.clone()
        }
    }
}

/// Lexically normalizes an absolute path, resolving `.` and `..` components
/// without touching the filesystem.
fn clean_absolute(path: &Path) -> Option<PathBuf> {
    if !path.is_absolute() {
        return None;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

fn is_within(path: &Path, dir: &Path) -> bool {
    path == dir || path.starts_with(dir)
}

/// Requires `raw` to be an absolute path that stays inside `trusted` both
/// lexically and after symlink resolution. Nonexistent targets skip the
/// symlink step; containment of the cleaned path is still enforced.
fn validate_material_path(raw: &str, trusted: &Path) -> Result<(), ValidationError> {
    let cleaned = clean_absolute(Path::new(raw))
        .ok_or(ValidationError::UntrustedCertificatePath)?;
    if !is_within(&cleaned, trusted) {
        return Err(ValidationError::UntrustedCertificatePath);
    }

    match cleaned.canonicalize() {
        Ok(resolved) => {
            let trusted_resolved = trusted.canonicalize().unwrap_or_else(|_| trusted.to_path_buf());
            if !is_within(&resolved, &trusted_resolved) {
                return Err(ValidationError::UntrustedCertificatePath);
            }
        }
        Err(_) => {
            // Material may not be present on the control host; the lexical
            // check above already bounds where it can be.
        }
    }
    Ok(())
}
