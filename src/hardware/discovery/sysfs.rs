//! Sysfs Path Resolver
//!
//! Derives the parent, partitions, holders and slaves of a block device
//! from the shape of its resolved sysfs path and the directories below it,
//! and reads the `size`, `queue/*`, `dm/*` and `md/*` attributes.

use crate::crd::{DeviceDependents, DriveType};
use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

// =============================================================================
// Constants
// =============================================================================

/// Directory of block device symlinks, relative to the sysfs root
pub const CLASS_BLOCK: &str = "class/block";

/// Directory holding device nodes
pub const DEV_DIR: &str = "/dev";

/// sysfs reports `size` in 512-byte sectors regardless of the device
const SECTOR_SIZE: u64 = 512;

const DEFAULT_BLOCK_SIZE: u32 = 512;

// =============================================================================
// Sysfs Device
// =============================================================================

/// A block device as seen through sysfs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsDevice {
    name: String,
    dev_path: PathBuf,
    sys_path: PathBuf,
}

impl SysfsDevice {
    /// Resolve `<sysfs_root>/class/block/<name>` for the device node `dev_path`
    pub fn resolve(sysfs_root: &Path, dev_path: &Path) -> Result<Self> {
        let name = device_name(dev_path).ok_or_else(|| Error::Sysfs {
            device: dev_path.display().to_string(),
            reason: "not a device node path".into(),
        })?;

        let link = sysfs_root.join(CLASS_BLOCK).join(&name);
        let sys_path = fs::canonicalize(&link).map_err(|e| Error::Sysfs {
            device: name.clone(),
            reason: format!("cannot resolve {}: {}", link.display(), e),
        })?;

        Ok(Self {
            name,
            dev_path: dev_path.to_path_buf(),
            sys_path,
        })
    }

    /// Build from already-known parts
    pub fn from_parts(
        name: impl Into<String>,
        dev_path: impl Into<PathBuf>,
        sys_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            dev_path: dev_path.into(),
            sys_path: sys_path.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dev_path(&self) -> &Path {
        &self.dev_path
    }

    pub fn sys_path(&self) -> &Path {
        &self.sys_path
    }

    // =========================================================================
    // Hierarchy
    // =========================================================================

    /// Parent device name, derived from the path shape alone
    ///
    /// Under the `block` subsystem the segment after `block` names the
    /// top-level disk; for NVMe the namespace sits two segments after `nvme`.
    /// When that segment is the device itself, it is a top-level device.
    pub fn parent(&self) -> Option<String> {
        parent_from_sys_path(&self.name, &self.sys_path)
    }

    /// Entries under the device's own directory prefixed by its name
    pub fn partitions(&self) -> Result<Vec<String>> {
        let entries = match self.list_dir(&self.sys_path)? {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };

        Ok(entries
            .into_iter()
            .filter(|entry| entry != &self.name && entry.starts_with(&self.name))
            .collect())
    }

    /// Devices built on top of this one; `None` when `holders/` is absent
    pub fn holders(&self) -> Result<Option<Vec<String>>> {
        self.list_dir(&self.sys_path.join("holders"))
    }

    /// Devices this one is composed of; `None` when `slaves/` is absent
    pub fn slaves(&self) -> Result<Option<Vec<String>>> {
        self.list_dir(&self.sys_path.join("slaves"))
    }

    /// Resolve every relationship in one go
    pub fn dependents(&self) -> Result<DeviceDependents> {
        Ok(DeviceDependents {
            parent: self.parent(),
            partitions: self.partitions()?,
            holders: self.holders()?.unwrap_or_default(),
            slaves: self.slaves()?.unwrap_or_default(),
        })
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Size in bytes
    pub fn capacity_bytes(&self) -> Result<u64> {
        let size = self.read_attr("size")?.ok_or_else(|| Error::Sysfs {
            device: self.name.clone(),
            reason: "size attribute missing".into(),
        })?;

        let sectors: u64 = size.parse().map_err(|_| Error::Sysfs {
            device: self.name.clone(),
            reason: format!("invalid size: {}", size),
        })?;

        Ok(sectors * SECTOR_SIZE)
    }

    pub fn logical_block_size(&self) -> u32 {
        self.read_u32_attr("queue/logical_block_size")
    }

    pub fn physical_block_size(&self) -> u32 {
        self.read_u32_attr("queue/physical_block_size")
    }

    pub fn hardware_sector_size(&self) -> u32 {
        self.read_u32_attr("queue/hw_sector_size")
    }

    /// SSD vs HDD from the rotational flag
    pub fn drive_type(&self) -> DriveType {
        match self.read_attr("queue/rotational").ok().flatten().as_deref() {
            Some("0") => DriveType::Ssd,
            Some("1") => DriveType::Hdd,
            _ => DriveType::Unknown,
        }
    }

    /// Content of `dm/uuid`, if the device is a device-mapper node
    pub fn dm_uuid(&self) -> Result<Option<String>> {
        self.read_attr("dm/uuid")
    }

    /// Content of `md/level`, if the device is an md array
    pub fn md_level(&self) -> Result<Option<String>> {
        self.read_attr("md/level")
    }

    pub fn model(&self) -> Option<String> {
        self.read_attr("device/model").ok().flatten()
    }

    pub fn vendor(&self) -> Option<String> {
        self.read_attr("device/vendor").ok().flatten()
    }

    pub fn serial(&self) -> Option<String> {
        self.read_attr("device/serial").ok().flatten()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Read a trimmed attribute; `None` when the file does not exist
    fn read_attr(&self, attr: &str) -> Result<Option<String>> {
        let path = self.sys_path.join(attr);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Sysfs {
                device: self.name.clone(),
                reason: format!("failed to read {}: {}", path.display(), e),
            }),
        }
    }

    fn read_u32_attr(&self, attr: &str) -> u32 {
        match self.read_attr(attr) {
            Ok(Some(value)) => value.parse().unwrap_or(DEFAULT_BLOCK_SIZE),
            Ok(None) => DEFAULT_BLOCK_SIZE,
            Err(e) => {
                debug!("{}", e);
                DEFAULT_BLOCK_SIZE
            }
        }
    }

    /// Sorted entry names of `dir`; `None` when it does not exist
    fn list_dir(&self, dir: &Path) -> Result<Option<Vec<String>>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Sysfs {
                    device: self.name.clone(),
                    reason: format!("failed to list {}: {}", dir.display(), e),
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(Some(names))
    }
}

/// Device name of a node path, e.g. `/dev/sda` -> `sda`
pub fn device_name(dev_path: &Path) -> Option<String> {
    let name = dev_path
        .strip_prefix(DEV_DIR)
        .unwrap_or(dev_path)
        .to_string_lossy()
        .into_owned();

    (!name.is_empty() && !name.contains('/')).then_some(name)
}

fn parent_from_sys_path(name: &str, sys_path: &Path) -> Option<String> {
    let parts: Vec<String> = sys_path
        .iter()
        .map(|part| part.to_string_lossy().into_owned())
        .collect();

    let segment_after = |subsystem: &str, offset: usize| {
        parts
            .iter()
            .position(|part| part == subsystem)
            .and_then(|i| parts.get(i + offset))
    };

    let candidate = segment_after("nvme", 2).or_else(|| segment_after("block", 1))?;

    (candidate != name).then(|| candidate.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Builds `devices/.../block/sda/{sda1,sda2}` plus `class/block` links
    fn fake_sysfs() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let disk = root.join("devices/pci0000:00/0000:00:1f.2/ata1/host0/target0:0:0/0:0:0:0/block/sda");

        write(&disk.join("size"), "20971520\n");
        write(&disk.join("queue/rotational"), "0\n");
        write(&disk.join("queue/logical_block_size"), "4096\n");
        write(&disk.join("device/model"), "Samsung SSD 870\n");
        write(&disk.join("sda1/size"), "2048\n");
        write(&disk.join("sda2/size"), "4096\n");
        fs::create_dir_all(disk.join("holders")).unwrap();
        fs::create_dir_all(disk.join("power")).unwrap();

        let class = root.join(CLASS_BLOCK);
        fs::create_dir_all(&class).unwrap();
        symlink(&disk, class.join("sda")).unwrap();
        symlink(disk.join("sda1"), class.join("sda1")).unwrap();

        tmp
    }

    #[test]
    fn test_parent_block_subsystem() {
        let disk = SysfsDevice::from_parts("sda", "/dev/sda", "/sys/devices/pci0/host0/block/sda");
        assert_eq!(disk.parent(), None);

        let part = SysfsDevice::from_parts("sda1", "/dev/sda1", "/sys/devices/pci0/host0/block/sda/sda1");
        assert_eq!(part.parent(), Some("sda".to_string()));

        let dm = SysfsDevice::from_parts("dm-0", "/dev/dm-0", "/sys/devices/virtual/block/dm-0");
        assert_eq!(dm.parent(), None);
    }

    #[test]
    fn test_parent_nvme_subsystem() {
        let ns = SysfsDevice::from_parts(
            "nvme0n1",
            "/dev/nvme0n1",
            "/sys/devices/pci0000:00/0000:00:0e.0/nvme/nvme0/nvme0n1",
        );
        assert_eq!(ns.parent(), None);

        let part = SysfsDevice::from_parts(
            "nvme0n1p1",
            "/dev/nvme0n1p1",
            "/sys/devices/pci0000:00/0000:00:0e.0/nvme/nvme0/nvme0n1/nvme0n1p1",
        );
        assert_eq!(part.parent(), Some("nvme0n1".to_string()));
    }

    #[test]
    fn test_parent_short_path() {
        let dev = SysfsDevice::from_parts("sda", "/dev/sda", "/sys/block");
        assert_eq!(dev.parent(), None);

        let dev = SysfsDevice::from_parts("nvme0n1", "/dev/nvme0n1", "/sys/nvme/nvme0");
        assert_eq!(dev.parent(), None);
    }

    #[test]
    fn test_resolve_and_dependents() {
        let tmp = fake_sysfs();

        let disk = SysfsDevice::resolve(tmp.path(), Path::new("/dev/sda")).unwrap();
        assert_eq!(disk.name(), "sda");
        assert!(disk.sys_path().ends_with("block/sda"));

        let deps = disk.dependents().unwrap();
        assert_eq!(deps.parent, None);
        assert_eq!(deps.partitions, vec!["sda1", "sda2"]);
        assert!(deps.holders.is_empty());
        assert!(deps.slaves.is_empty());

        // holders/ exists but is empty, slaves/ is absent
        assert_eq!(disk.holders().unwrap(), Some(Vec::new()));
        assert_eq!(disk.slaves().unwrap(), None);

        let part = SysfsDevice::resolve(tmp.path(), Path::new("/dev/sda1")).unwrap();
        assert_eq!(part.parent(), Some("sda".to_string()));
        assert!(part.partitions().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_missing_device() {
        let tmp = fake_sysfs();
        let err = SysfsDevice::resolve(tmp.path(), Path::new("/dev/sdz")).unwrap_err();
        assert!(matches!(err, Error::Sysfs { ref device, .. } if device == "sdz"));
    }

    #[test]
    fn test_partitions_of_missing_directory() {
        let dev = SysfsDevice::from_parts("sdq", "/dev/sdq", "/nonexistent/block/sdq");
        assert!(dev.partitions().unwrap().is_empty());
        assert_eq!(dev.holders().unwrap(), None);
    }

    #[test]
    fn test_attributes() {
        let tmp = fake_sysfs();
        let disk = SysfsDevice::resolve(tmp.path(), Path::new("/dev/sda")).unwrap();

        assert_eq!(disk.capacity_bytes().unwrap(), 20971520 * 512);
        assert_eq!(disk.drive_type(), DriveType::Ssd);
        assert_eq!(disk.logical_block_size(), 4096);
        assert_eq!(disk.physical_block_size(), DEFAULT_BLOCK_SIZE);
        assert_eq!(disk.model().as_deref(), Some("Samsung SSD 870"));
        assert_eq!(disk.serial(), None);
        assert_eq!(disk.dm_uuid().unwrap(), None);
    }

    #[test]
    fn test_device_name() {
        assert_eq!(device_name(Path::new("/dev/sda")), Some("sda".into()));
        assert_eq!(device_name(Path::new("nvme0n1")), Some("nvme0n1".into()));
        assert_eq!(device_name(Path::new("/dev/mapper/vg-lv")), None);
        assert_eq!(device_name(Path::new("/dev")), None);
    }
}
