//! Daemon Configuration
//!
//! YAML configuration for the node daemon. Every field has a default, so an
//! empty file (or no file at all) yields a working configuration.

use crate::error::{Error, Result};
use crate::hardware::discovery::{ScannerConfig, SparseConfig, PROC_MOUNTS};
use crate::hardware::watcher::{Watcher, DEFAULT_EVENT_BUFFER};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mount table watched by default; mount changes raise `EPOLLPRI`
pub const DEFAULT_WATCH_PATH: &str = PROC_MOUNTS;

// =============================================================================
// Daemon Configuration
// =============================================================================

/// Top-level daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonConfig {
    /// Node this daemon runs on
    pub node_name: String,
    /// Namespace holding the inventory records
    pub namespace: String,
    pub scanner: ScannerConfig,
    pub sparse: SparseConfig,
    pub watcher: WatcherConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            namespace: "default".to_string(),
            scanner: ScannerConfig::default(),
            sparse: SparseConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.node_name.is_empty() {
            return Err(Error::Configuration("node name is required".into()));
        }
        if self.watcher.buffer_size == 0 {
            return Err(Error::Configuration(
                "watcher buffer size must be positive".into(),
            ));
        }
        self.watcher.watchers()?;
        Ok(())
    }
}

// =============================================================================
// Watcher Configuration
// =============================================================================

/// Event watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherConfig {
    /// Event channel capacity
    pub buffer_size: usize,
    /// Listen for kernel block device uevents
    pub uevents: bool,
    /// Files to watch
    pub paths: Vec<WatchPath>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_EVENT_BUFFER,
            uevents: true,
            paths: vec![WatchPath {
                path: PathBuf::from(DEFAULT_WATCH_PATH),
                events: vec!["priority".into(), "error".into()],
            }],
        }
    }
}

impl WatcherConfig {
    /// Registrations for every configured path
    pub fn watchers(&self) -> Result<Vec<Watcher>> {
        self.paths
            .iter()
            .map(|watch| Watcher::from_names(&watch.path, watch.events.as_slice()))
            .collect()
    }
}

/// One watched file and its event names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchPath {
    pub path: PathBuf,
    pub events: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::watcher::EventType;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::from_yaml("").unwrap();

        assert_eq!(config.namespace, "default");
        assert_eq!(config.watcher.buffer_size, 64);
        assert!(config.watcher.uevents);
        assert!(config.sparse.directory.is_none());

        let watchers = config.watcher.watchers().unwrap();
        assert_eq!(watchers.len(), 1);
        assert_eq!(watchers[0].events(), EventType::Priority | EventType::Error);
    }

    #[test]
    fn test_default_mount_table_is_the_watched_one() {
        let config = DaemonConfig::default();

        assert_eq!(config.scanner.mounts_path, config.watcher.paths[0].path);
        assert_eq!(config.scanner.mounts_path, PathBuf::from("/proc/1/mounts"));
    }

    #[test]
    fn test_load_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ndm.yaml");
        fs::write(
            &path,
            r#"
nodeName: worker-3
namespace: storage
scanner:
  sysfsPath: /host/sys
  partitionScheme: true
  minSizeBytes: 1073741824
sparse:
  directory: /var/openebs/sparse
  count: 2
  sizeBytes: 10737418240
watcher:
  bufferSize: 16
  uevents: false
  paths:
    - path: /proc/1/mounts
      events: [priority]
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.node_name, "worker-3");
        assert_eq!(config.scanner.sysfs_path, PathBuf::from("/host/sys"));
        assert!(config.scanner.partition_scheme);
        assert!(config.scanner.include_loopback);
        assert_eq!(config.sparse.count, 2);
        assert_eq!(config.watcher.buffer_size, 16);
        assert!(!config.watcher.uevents);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate() {
        let config = DaemonConfig::default();
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let mut config = DaemonConfig {
            node_name: "n1".into(),
            ..Default::default()
        };
        config.watcher.paths[0].events.push("bogus".into());
        assert_matches!(config.validate(), Err(Error::UnknownEventType { .. }));
    }

    #[test]
    fn test_missing_file() {
        assert_matches!(
            DaemonConfig::load(Path::new("/does/not/exist.yaml")),
            Err(Error::Configuration(_))
        );
    }
}
