//! Sparse File Devices
//!
//! Provisions fixed-size sparse files in a directory and exposes them as
//! block devices. They have no sysfs presence and are only ever handed out
//! to claims that name them explicitly.

use super::device::Device;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name suffix of managed sparse files
pub const SPARSE_FILE_SUFFIX: &str = "-ndm-sparse.img";

/// Smallest sparse file created
pub const MIN_SPARSE_FILE_SIZE: u64 = 1 << 30;

// =============================================================================
// Configuration
// =============================================================================

/// Sparse file settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SparseConfig {
    /// Directory holding the files; sparse devices are disabled when unset
    pub directory: Option<PathBuf>,
    /// Number of files to keep
    pub count: u32,
    /// Length of each file in bytes
    pub size_bytes: u64,
}

// =============================================================================
// Sparse File Manager
// =============================================================================

/// Creates and lists sparse file devices
#[derive(Debug, Clone)]
pub struct SparseFileManager {
    directory: PathBuf,
    count: u32,
    size_bytes: u64,
}

impl SparseFileManager {
    pub fn new(directory: impl Into<PathBuf>, count: u32, size_bytes: u64) -> Self {
        let size_bytes = if size_bytes < MIN_SPARSE_FILE_SIZE {
            warn!(
                "Sparse file size {} below minimum, using {}",
                size_bytes, MIN_SPARSE_FILE_SIZE
            );
            MIN_SPARSE_FILE_SIZE
        } else {
            size_bytes
        };

        Self {
            directory: directory.into(),
            count,
            size_bytes,
        }
    }

    /// Manager for the configured directory, if any
    pub fn from_config(config: &SparseConfig) -> Option<Self> {
        let directory = config.directory.as_ref()?;
        Some(Self::new(directory, config.count, config.size_bytes))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Path of the `index`-th sparse file
    pub fn file_path(&self, index: u32) -> PathBuf {
        self.directory
            .join(format!("{}{}", index, SPARSE_FILE_SUFFIX))
    }

    /// Create any missing sparse files; existing files are left untouched
    pub fn ensure(&self) -> Result<Vec<PathBuf>> {
        if self.count == 0 {
            return Ok(Vec::new());
        }

        fs::create_dir_all(&self.directory)?;

        let mut paths = Vec::with_capacity(self.count as usize);
        for index in 0..self.count {
            let path = self.file_path(index);

            if path.exists() {
                debug!("Sparse file {} already exists", path.display());
            } else {
                let file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)?;
                file.set_len(self.size_bytes)?;
                info!(
                    "Created sparse file {} ({} bytes)",
                    path.display(),
                    self.size_bytes
                );
            }

            paths.push(path);
        }

        Ok(paths)
    }

    /// Sparse files present in the directory, sorted by name
    pub fn devices(&self) -> Result<Vec<Device>> {
        let pattern = self.directory.join(format!("*{}", SPARSE_FILE_SUFFIX));
        let pattern = pattern.to_string_lossy();

        let paths = glob::glob(&pattern).map_err(|e| {
            Error::Configuration(format!("invalid sparse file pattern {}: {}", pattern, e))
        })?;

        let mut devices: Vec<Device> = paths
            .filter_map(|entry| match entry {
                Ok(path) if path.is_file() => Some(Device::sparse(path)),
                Ok(_) => None,
                Err(e) => {
                    warn!("Skipping unreadable sparse file: {}", e);
                    None
                }
            })
            .collect();
        devices.sort_by(|a, b| a.path().cmp(b.path()));

        Ok(devices)
    }

    /// Length of a sparse file
    pub fn capacity_bytes(path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }
}
