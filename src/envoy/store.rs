//! On-disk configuration store.
//!
//! Owns everything under the Envoy config directory: the two managed
//! documents, the bootstrap next to it, and the last-known-good backup set.
//! Every write goes through a path guard and an atomic temp-file rename so
//! the proxy only ever observes a complete document.

use std::fs;
use std::path::{Component, Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use thiserror::Error;
use tracing::debug;

use crate::envoy::generator::EnvoyConfig;

const LISTENERS_FILE: &str = "listeners.yaml";
const CLUSTERS_FILE: &str = "clusters.yaml";
const BOOTSTRAP_FILE: &str = "bootstrap.yaml";
const BACKUP_DIR: &str = ".backup";

/// Live files are read by the proxy's OS user, backups only by the agent.
const LIVE_MODE: u32 = 0o644;
const BACKUP_MODE: u32 = 0o600;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("path escapes allowed directories: {0}")]
    PathEscape(PathBuf),

    #[error("invalid config directory {path}: {source}")]
    InvalidDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

/// File store rooted at the config directory; the bootstrap lives in the
/// parent so a proxy restart can find it without knowing the layout.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_dir: PathBuf,
    base_dir: PathBuf,
}

impl ConfigStore {
    /// Create a store over `config_dir`. The directory is normalized up
    /// front; its parent becomes the only other writable location (for the
    /// bootstrap document).
    pub fn new(config_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let config_dir = config_dir.as_ref();
        let cleaned = clean_path(config_dir).ok_or_else(|| StoreError::InvalidDir {
            path: config_dir.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "config directory must be an absolute path",
            ),
        })?;
        let base_dir = cleaned
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cleaned.clone());

        Ok(Self {
            config_dir: cleaned,
            base_dir,
        })
    }

    pub fn listeners_path(&self) -> PathBuf {
        self.config_dir.join(LISTENERS_FILE)
    }

    pub fn clusters_path(&self) -> PathBuf {
        self.config_dir.join(CLUSTERS_FILE)
    }

    pub fn bootstrap_path(&self) -> PathBuf {
        self.base_dir.join(BOOTSTRAP_FILE)
    }

    /// Write both managed documents. On a partial failure the caller is
    /// expected to invoke [`ConfigStore::restore_config`].
    pub fn apply_config(&self, config: &EnvoyConfig) -> Result<(), StoreError> {
        self.atomic_write(&self.listeners_path(), config.listeners.as_bytes())?;
        self.atomic_write(&self.clusters_path(), config.clusters.as_bytes())?;
        Ok(())
    }

    /// Write the bootstrap document into the parent directory.
    pub fn write_bootstrap(&self, bootstrap: &str) -> Result<(), StoreError> {
        self.atomic_write(&self.bootstrap_path(), bootstrap.as_bytes())
    }

    /// Copy the managed files into the backup directory. Files that do not
    /// exist yet (first run) are skipped.
    pub fn backup_config(&self) -> Result<(), StoreError> {
        let backup_dir = self.config_dir.join(BACKUP_DIR);
        fs::create_dir_all(&backup_dir).map_err(|source| StoreError::Io {
            action: "create",
            path: backup_dir.clone(),
            source,
        })?;

        for file in [LISTENERS_FILE, CLUSTERS_FILE] {
            let src = self.config_dir.join(file);
            let dst = backup_dir.join(file);
            self.copy_file(&src, &dst, BACKUP_MODE)?;
        }
        Ok(())
    }

    /// Copy the backup set back over the managed files. Missing backups are
    /// skipped so a partial backup never blocks a rollback.
    pub fn restore_config(&self) -> Result<(), StoreError> {
        let backup_dir = self.config_dir.join(BACKUP_DIR);
        for file in [LISTENERS_FILE, CLUSTERS_FILE] {
            let src = backup_dir.join(file);
            let dst = self.config_dir.join(file);
            self.copy_file(&src, &dst, LIVE_MODE)?;
        }
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path, mode: u32) -> Result<(), StoreError> {
        self.check_path(src)?;
        self.check_path(dst)?;

        let data = match fs::read(src) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %src.display(), "source missing, skipping copy");
                return Ok(());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    action: "read",
                    path: src.to_path_buf(),
                    source,
                });
            }
        };

        write_with_mode(dst, &data, mode).map_err(|source| StoreError::Io {
            action: "write",
            path: dst.to_path_buf(),
            source,
        })
    }

    /// Temp-file write followed by a rename; the temp file is removed on any
    /// failure after creation. The rename is the only point where another
    /// process can observe the new content.
    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        self.check_path(path)?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                action: "create",
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let tmp_path = path.with_extension("yaml.tmp");
        write_with_mode(&tmp_path, data, LIVE_MODE).map_err(|source| StoreError::Io {
            action: "write",
            path: tmp_path.clone(),
            source,
        })?;

        if let Err(source) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::Io {
                action: "rename",
                path: tmp_path,
                source,
            });
        }
        Ok(())
    }

    /// Path guard: the cleaned absolute path must stay inside the config
    /// directory or its parent, and so must its symlink-resolved form when
    /// the file already exists.
    fn check_path(&self, path: &Path) -> Result<(), StoreError> {
        let cleaned =
            clean_path(path).ok_or_else(|| StoreError::PathEscape(path.to_path_buf()))?;

        if !self.is_allowed(&cleaned) {
            return Err(StoreError::PathEscape(cleaned));
        }

        if let Ok(resolved) = cleaned.canonicalize() {
            if resolved != cleaned && !self.is_allowed(&resolved) {
                return Err(StoreError::PathEscape(resolved));
            }
        }
        Ok(())
    }

    fn is_allowed(&self, path: &Path) -> bool {
        path == self.config_dir
            || path.starts_with(&self.config_dir)
            || path == self.base_dir
            || path.starts_with(&self.base_dir)
    }
}

/// Lexical normalization of an absolute path; `..` never escapes the root.
fn clean_path(path: &Path) -> Option<PathBuf> {
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

#[cfg(unix)]
fn write_with_mode(path: &Path, data: &[u8], mode: u32) -> std::io::Result<()> {
    fs::write(path, data)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn write_with_mode(path: &Path, data: &[u8], _mode: u32) -> std::io::Result<()> {
    fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let tmp = tempfile::tempdir().unwrap();
        let config_dir = tmp.path().join("conf");
        fs::create_dir_all(&config_dir).unwrap();
        let store = ConfigStore::new(&config_dir).unwrap();
        (tmp, store)
    }

    fn sample_config() -> EnvoyConfig {
        EnvoyConfig {
            listeners: "resources:\n- name: l1\n".to_string(),
            clusters: "resources:\n- name: c1\n".to_string(),
        }
    }

    #[test]
    fn relative_config_dir_rejected() {
        assert!(matches!(
            ConfigStore::new("relative/conf"),
            Err(StoreError::InvalidDir { .. })
        ));
    }

    #[test]
    fn apply_writes_both_documents() {
        let (_tmp, store) = store();
        store.apply_config(&sample_config()).unwrap();
        assert_eq!(
            fs::read_to_string(store.listeners_path()).unwrap(),
            "resources:\n- name: l1\n"
        );
        assert_eq!(
            fs::read_to_string(store.clusters_path()).unwrap(),
            "resources:\n- name: c1\n"
        );
    }

    #[test]
    fn apply_leaves_no_temp_files() {
        let (_tmp, store) = store();
        store.apply_config(&sample_config()).unwrap();
        let leftovers: Vec<_> = fs::read_dir(store.listeners_path().parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn live_files_are_world_readable_and_backups_are_not() {
        let (_tmp, store) = store();
        store.apply_config(&sample_config()).unwrap();
        store.backup_config().unwrap();

        let live = fs::metadata(store.listeners_path()).unwrap();
        assert_eq!(live.permissions().mode() & 0o777, 0o644);

        let backup_dir = store.listeners_path().parent().unwrap().join(".backup");
        let backup = fs::metadata(backup_dir.join("listeners.yaml")).unwrap();
        assert_eq!(backup.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn backup_then_restore_round_trips() {
        let (_tmp, store) = store();
        store.apply_config(&sample_config()).unwrap();
        store.backup_config().unwrap();

        let changed = EnvoyConfig {
            listeners: "resources: []\n".to_string(),
            clusters: "resources: []\n".to_string(),
        };
        store.apply_config(&changed).unwrap();
        store.restore_config().unwrap();

        assert_eq!(
            fs::read_to_string(store.listeners_path()).unwrap(),
            "resources:\n- name: l1\n"
        );
        assert_eq!(
            fs::read_to_string(store.clusters_path()).unwrap(),
            "resources:\n- name: c1\n"
        );
    }

    #[test]
    fn backup_with_missing_sources_succeeds() {
        let (_tmp, store) = store();
        store.backup_config().unwrap();
    }

    #[test]
    fn restore_with_missing_backups_succeeds() {
        let (_tmp, store) = store();
        store.apply_config(&sample_config()).unwrap();
        store.restore_config().unwrap();
        // Live files untouched because there was nothing to restore.
        assert_eq!(
            fs::read_to_string(store.listeners_path()).unwrap(),
            "resources:\n- name: l1\n"
        );
    }

    #[test]
    fn bootstrap_lands_in_parent_directory() {
        let (tmp, store) = store();
        store.write_bootstrap("node:\n  id: lb-1\n").unwrap();
        let bootstrap = tmp.path().join("bootstrap.yaml");
        assert_eq!(fs::read_to_string(bootstrap).unwrap(), "node:\n  id: lb-1\n");
    }

    #[test]
    fn escaping_paths_rejected_without_touching_fs() {
        let (tmp, store) = store();
        let outside = tmp.path().join("conf/../../outside.yaml");
        let err = store.atomic_write(&outside, b"x").unwrap_err();
        assert!(matches!(err, StoreError::PathEscape(_)));
        assert!(!tmp.path().parent().unwrap().join("outside.yaml").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_rejected() {
        let (tmp, store) = store();
        let outside_dir = tempfile::tempdir().unwrap();
        let link = store.listeners_path().parent().unwrap().join("evil.yaml");
        std::os::unix::fs::symlink(outside_dir.path().join("target.yaml"), &link).unwrap();
        fs::write(outside_dir.path().join("target.yaml"), b"seed").unwrap();

        let err = store.atomic_write(&link, b"x").unwrap_err();
        assert!(matches!(err, StoreError::PathEscape(_)));
        assert_eq!(
            fs::read(outside_dir.path().join("target.yaml")).unwrap(),
            b"seed"
        );
        drop(tmp);
    }
}
