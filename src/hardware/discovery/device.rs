//! Discovered devices
//!
//! A device found during one discovery pass: its identity, its declared
//! kind, and (for everything but sparse files) its sysfs view.

use super::sysfs::SysfsDevice;
use crate::crd::DeviceKind;
use std::path::{Path, PathBuf};

/// A block device found during discovery
///
/// Re-derived on every pass. Sparse devices carry no sysfs view, so no
/// sysfs lookup can ever be issued for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    name: String,
    path: PathBuf,
    kind: DeviceKind,
    sysfs: Option<SysfsDevice>,
}

impl Device {
    /// A device backed by a sysfs entry
    pub fn from_sysfs(sysfs: SysfsDevice, kind: DeviceKind) -> Self {
        Self {
            name: sysfs.name().to_string(),
            path: sysfs.dev_path().to_path_buf(),
            kind,
            sysfs: Some(sysfs),
        }
    }

    /// A device backed by a sparse file
    pub fn sparse(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            name,
            path,
            kind: DeviceKind::Sparse,
            sysfs: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    /// The sysfs view; `None` for sparse devices
    pub fn sysfs(&self) -> Option<&SysfsDevice> {
        self.sysfs.as_ref()
    }

    pub fn is_sparse(&self) -> bool {
        self.sysfs.is_none()
    }
}
