//! Block Device Scanner
//!
//! Runs one discovery pass: enumerates block devices from sysfs and sparse
//! files, classifies them, aggregates the hierarchy and builds one
//! inventory record per usable device.

use super::device::Device;
use super::mounts::{MountTable, PROC_MOUNTS};
use super::signature::detect_signature;
use super::sparse::SparseFileManager;
use super::sysfs::{SysfsDevice, CLASS_BLOCK, DEV_DIR};
use crate::crd::{
    BlockDevice, BlockDeviceSpec, ClaimState, DeviceCapacity, DeviceDetails, DeviceKind,
    DeviceState, FileSystemInfo, NodeAttributes, HOSTNAME_LABEL, NODE_NAME_LABEL,
};
use crate::error::{Error, Result};
use crate::hardware::classification::{
    partitions_or_self, AggregateOptions, DeviceClassifier, DeviceHierarchy,
    HierarchyAggregator, ResolvedDevice,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// =============================================================================
// Scanner Configuration
// =============================================================================

/// Configuration for the hardware scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerConfig {
    /// Include loopback devices
    pub include_loopback: bool,
    /// Include RAM disks and zram
    pub include_ram: bool,
    /// Minimum device size to publish (bytes); sparse files are exempt
    pub min_size_bytes: u64,
    /// Explicit partition numbering scheme
    pub partition_scheme: bool,
    /// Path to sysfs (for testing)
    pub sysfs_path: PathBuf,
    /// Mount table to read filesystem state from
    pub mounts_path: PathBuf,
    /// Directory holding the device nodes read for on-disk signatures
    pub dev_dir: PathBuf,
    /// Read signatures of unmounted devices
    pub detect_signatures: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            include_loopback: true,
            include_ram: false,
            min_size_bytes: 0,
            partition_scheme: false,
            sysfs_path: PathBuf::from("/sys"),
            mounts_path: PathBuf::from(PROC_MOUNTS),
            dev_dir: PathBuf::from(DEV_DIR),
            detect_signatures: true,
        }
    }
}

// =============================================================================
// Discovery Report
// =============================================================================

/// Result of one discovery pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub node_name: String,
    pub hierarchy: DeviceHierarchy,
    pub devices: Vec<BlockDevice>,
    pub discovered_at: DateTime<Utc>,
}

// =============================================================================
// Hardware Scanner
// =============================================================================

/// Scans block devices on the local node
pub struct HardwareScanner {
    node_name: String,
    config: ScannerConfig,
    classifier: DeviceClassifier,
    aggregator: HierarchyAggregator,
    sparse: Option<SparseFileManager>,
}

impl HardwareScanner {
    /// Create a new hardware scanner
    pub fn new(node_name: impl Into<String>, config: ScannerConfig) -> Self {
        let aggregator = HierarchyAggregator::new(AggregateOptions {
            partition_scheme: config.partition_scheme,
        });

        Self {
            node_name: node_name.into(),
            config,
            classifier: DeviceClassifier::new(),
            aggregator,
            sparse: None,
        }
    }

    /// Also publish sparse file devices
    pub fn with_sparse(mut self, sparse: SparseFileManager) -> Self {
        self.sparse = Some(sparse);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Run a full discovery pass
    pub fn discover(&self) -> Result<DiscoveryReport> {
        info!("Starting block device discovery on {}", self.node_name);

        let devices = self.enumerate()?;
        let resolved = self.aggregator.resolve(&devices);
        let hierarchy = self.aggregator.bucket(&resolved);

        let mounts = MountTable::read(&self.config.mounts_path).unwrap_or_else(|e| {
            warn!(
                "Cannot read mount table {}: {}",
                self.config.mounts_path.display(),
                e
            );
            MountTable::default()
        });

        let records: Vec<BlockDevice> = resolved
            .iter()
            .filter_map(|resolved| self.build_record(resolved, &mounts))
            .collect();

        info!(
            "Discovered {} devices, {} usable",
            devices.len(),
            records.len()
        );

        Ok(DiscoveryReport {
            node_name: self.node_name.clone(),
            hierarchy,
            devices: records,
            discovered_at: Utc::now(),
        })
    }

    /// List and classify every device, sysfs first, sparse files last
    pub fn enumerate(&self) -> Result<Vec<Device>> {
        let block_path = self.config.sysfs_path.join(CLASS_BLOCK);
        if !block_path.exists() {
            return Err(Error::HardwareDiscovery(format!(
                "Block device sysfs not found at {}",
                block_path.display()
            )));
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&block_path)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if self.should_include_device(&name) {
                names.push(name);
            }
        }
        names.sort();

        let mut devices = Vec::with_capacity(names.len());
        for name in names {
            let dev_path = Path::new(DEV_DIR).join(&name);
            match self.classify_sysfs(&dev_path) {
                Ok(device) => devices.push(device),
                Err(e) => warn!("Skipping {}: {}", name, e),
            }
        }

        if let Some(sparse) = &self.sparse {
            match sparse.devices() {
                Ok(sparse_devices) => devices.extend(sparse_devices),
                Err(e) => warn!("Sparse file discovery failed: {}", e),
            }
        }

        Ok(devices)
    }

    fn classify_sysfs(&self, dev_path: &Path) -> Result<Device> {
        let sysfs = SysfsDevice::resolve(&self.config.sysfs_path, dev_path)?;
        let kind = self.classifier.classify(&sysfs)?;
        debug!("{} classified as {}", sysfs.name(), kind);
        Ok(Device::from_sysfs(sysfs, kind))
    }

    /// Inventory record for a usable device; disks with partitions are
    /// represented by their partitions instead
    fn build_record(&self, resolved: &ResolvedDevice<'_>, mounts: &MountTable) -> Option<BlockDevice> {
        let device = resolved.device;
        let name = device.name();

        if *device.kind() == DeviceKind::Disk {
            let usable = partitions_or_self(name, &resolved.dependents.partitions);
            if !usable.iter().any(|u| u == name) {
                debug!("{} is used through its partitions {:?}", name, usable);
                return None;
            }
        }

        let (capacity, details) = match device.sysfs() {
            Some(sysfs) => {
                let storage = match sysfs.capacity_bytes() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Skipping {}: {}", name, e);
                        return None;
                    }
                };
                if storage < self.config.min_size_bytes {
                    debug!("Skipping {}: {} bytes below minimum", name, storage);
                    return None;
                }

                let capacity = DeviceCapacity {
                    storage,
                    logical_sector_size: sysfs.logical_block_size(),
                    physical_sector_size: sysfs.physical_block_size(),
                };
                let details = DeviceDetails {
                    device_type: device.kind().clone(),
                    drive_type: sysfs.drive_type(),
                    hardware_sector_size: sysfs.hardware_sector_size(),
                    model: sysfs.model(),
                    serial: sysfs.serial(),
                    vendor: sysfs.vendor(),
                };
                (capacity, details)
            }
            None => {
                let storage = match SparseFileManager::capacity_bytes(device.path()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Skipping sparse file {}: {}", name, e);
                        return None;
                    }
                };
                let capacity = DeviceCapacity {
                    storage,
                    ..Default::default()
                };
                let details = DeviceDetails {
                    device_type: DeviceKind::Sparse,
                    ..Default::default()
                };
                (capacity, details)
            }
        };

        let path = device.path().to_string_lossy().into_owned();
        let filesystem = match mounts.lookup(&path) {
            Some(entry) => FileSystemInfo {
                fs_type: Some(entry.fs_type.clone()),
                mount_point: Some(entry.mount_point.clone()),
            },
            None => FileSystemInfo {
                fs_type: self.signature(device),
                mount_point: None,
            },
        };

        let spec = BlockDeviceSpec {
            path,
            node_attributes: NodeAttributes {
                node_name: self.node_name.clone(),
            },
            capacity,
            details,
            filesystem,
            dependents: resolved.dependents.clone(),
            claim_ref: None,
        };

        let record = BlockDevice::new(&BlockDevice::record_name(&self.node_name, name), spec)
            .with_label(HOSTNAME_LABEL, &self.node_name)
            .with_label(NODE_NAME_LABEL, &self.node_name)
            .with_status(DeviceState::Active, ClaimState::Unclaimed);

        Some(record)
    }

    /// On-disk signature of an unmounted device; unreadable nodes count
    /// as blank
    fn signature(&self, device: &Device) -> Option<String> {
        if !self.config.detect_signatures {
            return None;
        }

        let source = match device.sysfs() {
            Some(_) => self.config.dev_dir.join(device.name()),
            None => device.path().to_path_buf(),
        };
        match detect_signature(&source) {
            Ok(signature) => signature.map(String::from),
            Err(e) => {
                debug!("Cannot read signature of {}: {}", source.display(), e);
                None
            }
        }
    }

    /// Check if a device should be included
    fn should_include_device(&self, name: &str) -> bool {
        if !self.config.include_loopback && name.starts_with("loop") {
            return false;
        }

        if !self.config.include_ram && (name.starts_with("ram") || name.starts_with("zram")) {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::discovery::sparse::MIN_SPARSE_FILE_SIZE;
    use kube::ResourceExt;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn link(root: &Path, target: &Path, name: &str) {
        let class = root.join(CLASS_BLOCK);
        fs::create_dir_all(&class).unwrap();
        symlink(target, class.join(name)).unwrap();
    }

    /// sda (2 partitions), sdb (whole disk), nvme0n1, dm-0 (lvm on sda2),
    /// loop0 and ram0
    fn fake_sysfs() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();

        let sda = root.join("devices/pci0000:00/ata1/host0/block/sda");
        write(&sda.join("size"), "41943040");
        write(&sda.join("queue/rotational"), "1");
        write(&sda.join("sda1/size"), "2048");
        write(&sda.join("sda2/size"), "41938944");
        fs::create_dir_all(sda.join("sda2/holders/dm-0")).unwrap();
        link(root, &sda, "sda");
        link(root, &sda.join("sda1"), "sda1");
        link(root, &sda.join("sda2"), "sda2");

        let sdb = root.join("devices/pci0000:00/ata2/host1/block/sdb");
        write(&sdb.join("size"), "20971520");
        write(&sdb.join("queue/rotational"), "0");
        link(root, &sdb, "sdb");

        let nvme = root.join("devices/pci0000:00/0000:00:0e.0/nvme/nvme0/nvme0n1");
        write(&nvme.join("size"), "1000215216");
        write(&nvme.join("device/serial"), "S4EWNX0R123");
        link(root, &nvme, "nvme0n1");

        let dm = root.join("devices/virtual/block/dm-0");
        write(&dm.join("size"), "41938944");
        write(&dm.join("dm/uuid"), "LVM-abcdef");
        fs::create_dir_all(dm.join("slaves/sda2")).unwrap();
        link(root, &dm, "dm-0");

        let lp = root.join("devices/virtual/block/loop0");
        write(&lp.join("size"), "0");
        link(root, &lp, "loop0");

        let ram = root.join("devices/virtual/block/ram0");
        write(&ram.join("size"), "8192");
        link(root, &ram, "ram0");

        write(&root.join("mounts"), "/dev/sdb /data ext4 rw 0 0\n");

        tmp
    }

    fn config(root: &Path) -> ScannerConfig {
        ScannerConfig {
            sysfs_path: root.to_path_buf(),
            mounts_path: root.join("mounts"),
            dev_dir: root.join("dev"),
            ..Default::default()
        }
    }

    fn scanner(root: &Path) -> HardwareScanner {
        HardwareScanner::new("node-1", config(root))
    }

    /// Device node image starting with `magic` at `offset`
    fn format(root: &Path, name: &str, offset: usize, magic: &[u8]) {
        let mut image = vec![0u8; 0x2000];
        image[offset..offset + magic.len()].copy_from_slice(magic);
        write_bytes(&root.join("dev").join(name), &image);
    }

    fn write_bytes(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scanner_config_defaults() {
        let config = ScannerConfig::default();

        assert!(config.include_loopback);
        assert!(!config.include_ram);
        assert!(!config.partition_scheme);
        assert_eq!(config.sysfs_path, PathBuf::from("/sys"));
    }

    #[test]
    fn test_should_include_device() {
        let scanner = scanner(Path::new("/sys"));

        assert!(scanner.should_include_device("sda"));
        assert!(scanner.should_include_device("nvme0n1"));
        assert!(scanner.should_include_device("loop0"));
        assert!(!scanner.should_include_device("ram0"));
        assert!(!scanner.should_include_device("zram0"));
    }

    #[test]
    fn test_enumerate_classifies_devices() {
        let tmp = fake_sysfs();
        let devices = scanner(tmp.path()).enumerate().unwrap();

        let kinds: Vec<(&str, String)> = devices
            .iter()
            .map(|d| (d.name(), d.kind().to_string()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("dm-0", "lvm".to_string()),
                ("loop0", "loop".to_string()),
                ("nvme0n1", "disk".to_string()),
                ("sda", "disk".to_string()),
                ("sda1", "partition".to_string()),
                ("sda2", "partition".to_string()),
                ("sdb", "disk".to_string()),
            ]
        );
    }

    #[test]
    fn test_discover_builds_hierarchy_and_records() {
        let tmp = fake_sysfs();
        let report = scanner(tmp.path()).discover().unwrap();

        assert_eq!(report.node_name, "node-1");
        assert_eq!(report.hierarchy.parents, vec!["nvme0n1", "sda", "sdb"]);
        assert_eq!(report.hierarchy.partitions, vec!["sda1", "sda2"]);
        assert_eq!(report.hierarchy.lvms, vec!["dm-0"]);
        assert_eq!(report.hierarchy.slaves, vec!["sda2"]);
        assert_eq!(report.hierarchy.loops, vec!["loop0"]);

        let names: Vec<String> = report.devices.iter().map(|d| d.name_any()).collect();
        assert!(!names.contains(&"blockdevice-node-1-sda".to_string()));
        assert!(names.contains(&"blockdevice-node-1-sda1".to_string()));
        assert!(names.contains(&"blockdevice-node-1-sdb".to_string()));

        let sdb = report
            .devices
            .iter()
            .find(|d| d.spec.path == "/dev/sdb")
            .unwrap();
        assert_eq!(sdb.capacity_bytes(), 20971520 * 512);
        assert_eq!(sdb.spec.filesystem.fs_type.as_deref(), Some("ext4"));
        assert_eq!(sdb.spec.filesystem.mount_point.as_deref(), Some("/data"));
        assert_eq!(sdb.label(HOSTNAME_LABEL), Some("node-1"));
        assert_eq!(sdb.state(), DeviceState::Active);

        let nvme = report
            .devices
            .iter()
            .find(|d| d.spec.path == "/dev/nvme0n1")
            .unwrap();
        assert_eq!(nvme.spec.details.serial.as_deref(), Some("S4EWNX0R123"));

        let sda2 = report
            .devices
            .iter()
            .find(|d| d.spec.path == "/dev/sda2")
            .unwrap();
        assert_eq!(sda2.spec.dependents.parent.as_deref(), Some("sda"));
        assert_eq!(sda2.spec.dependents.holders, vec!["dm-0"]);
    }

    #[test]
    fn test_min_size_filters_records_but_not_hierarchy() {
        let tmp = fake_sysfs();
        let scanner = HardwareScanner::new(
            "node-1",
            ScannerConfig {
                min_size_bytes: 1,
                ..config(tmp.path())
            },
        );

        let report = scanner.discover().unwrap();
        assert_eq!(report.hierarchy.loops, vec!["loop0"]);
        assert!(report.devices.iter().all(|d| d.spec.path != "/dev/loop0"));
    }

    #[test]
    fn test_unmounted_signatures_mark_devices_in_use() {
        let tmp = fake_sysfs();
        format(tmp.path(), "nvme0n1", 0, b"XFSB");
        format(tmp.path(), "sda1", 0x218, b"LVM2 001");
        // Mounted devices keep what the mount table says
        format(tmp.path(), "sdb", 0, b"XFSB");

        let report = scanner(tmp.path()).discover().unwrap();
        let by_path = |path: &str| {
            report
                .devices
                .iter()
                .find(|d| d.spec.path == path)
                .unwrap()
                .clone()
        };

        let nvme = by_path("/dev/nvme0n1");
        assert_eq!(nvme.spec.filesystem.fs_type.as_deref(), Some("xfs"));
        assert!(nvme.spec.filesystem.mount_point.is_none());
        assert!(!nvme.spec.filesystem.is_empty());

        let sda1 = by_path("/dev/sda1");
        assert_eq!(sda1.spec.filesystem.fs_type.as_deref(), Some("LVM2_member"));

        let sdb = by_path("/dev/sdb");
        assert_eq!(sdb.spec.filesystem.fs_type.as_deref(), Some("ext4"));
        assert_eq!(sdb.spec.filesystem.mount_point.as_deref(), Some("/data"));

        // No device node at all
        let sda2 = by_path("/dev/sda2");
        assert!(sda2.spec.filesystem.is_empty());
    }

    #[test]
    fn test_formatted_device_is_not_offered_for_block_mode() {
        use crate::crd::{BlockDeviceClaimSpec, VolumeMode, STORAGE_RESOURCE};
        use crate::hardware::allocation::select_device;

        let tmp = fake_sysfs();
        format(tmp.path(), "nvme0n1", 0, b"XFSB");
        let report = scanner(tmp.path()).discover().unwrap();

        let mut claim = BlockDeviceClaimSpec::default();
        claim
            .resources
            .requests
            .insert(STORAGE_RESOURCE.into(), "100Gi".into());
        claim.details.volume_mode = Some(VolumeMode::Block);

        // nvme0n1 is the only device large enough, but it holds xfs
        assert!(matches!(
            select_device(&report.devices, &claim),
            Err(Error::NoMatchingDevices) | Err(Error::NoDeviceWithResources { .. })
        ));

        let mut unchecked = config(tmp.path());
        unchecked.detect_signatures = false;
        let report = HardwareScanner::new("node-1", unchecked).discover().unwrap();
        let selected = select_device(&report.devices, &claim).unwrap();
        assert_eq!(selected.spec.path, "/dev/nvme0n1");
    }

    #[test]
    fn test_discover_includes_sparse_files() {
        let tmp = fake_sysfs();
        let sparse_dir = tmp.path().join("sparse");
        let manager = SparseFileManager::new(&sparse_dir, 1, MIN_SPARSE_FILE_SIZE);
        manager.ensure().unwrap();

        let report = scanner(tmp.path()).with_sparse(manager).discover().unwrap();

        assert_eq!(report.hierarchy.sparse, vec!["0-ndm-sparse.img"]);
        let sparse = report.devices.iter().find(|d| d.is_sparse()).unwrap();
        assert_eq!(sparse.capacity_bytes(), MIN_SPARSE_FILE_SIZE);
        assert!(sparse.spec.path.ends_with("0-ndm-sparse.img"));
    }

    #[test]
    fn test_missing_sysfs() {
        let tmp = TempDir::new().unwrap();
        let err = scanner(tmp.path()).enumerate().unwrap_err();
        assert!(matches!(err, Error::HardwareDiscovery(_)));
    }
}
