//! BlockDevice CRD
//!
//! One record per usable block device on a node: identity, classification,
//! capacity, filesystem state, hierarchy and claim status.

use kube::{CustomResource, ResourceExt};
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

// =============================================================================
// Well-known labels and annotations
// =============================================================================

/// Label reserving a device for claims whose selector names it
pub const DEVICE_TAG_LABEL: &str = "storage.billyronks.io/block-device-tag";

/// Standard Kubernetes hostname label
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Node the device was discovered on
pub const NODE_NAME_LABEL: &str = "storage.billyronks.io/node-name";

/// Annotation recording which identity scheme generated the record name
pub const UUID_SCHEME_ANNOTATION: &str = "internal.storage.billyronks.io/uuid-scheme";

/// Deprecated identity scheme; such records are never handed out
pub const LEGACY_UUID_SCHEME: &str = "legacy";

// =============================================================================
// BlockDevice CRD
// =============================================================================

/// BlockDevice is the inventory record for a single block device on a node.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1alpha1",
    kind = "BlockDevice",
    plural = "blockdevices",
    shortname = "bd",
    status = "BlockDeviceStatus",
    namespaced,
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.nodeAttributes.nodeName"}"#,
    printcolumn = r#"{"name": "Path", "type": "string", "jsonPath": ".spec.path"}"#,
    printcolumn = r#"{"name": "Size", "type": "integer", "jsonPath": ".spec.capacity.storage"}"#,
    printcolumn = r#"{"name": "ClaimState", "type": "string", "jsonPath": ".status.claimState"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceSpec {
    /// Device node path, e.g. `/dev/sda` or the backing file of a sparse device
    pub path: String,

    /// Node the device is attached to
    #[serde(default)]
    pub node_attributes: NodeAttributes,

    /// Size information
    #[serde(default)]
    pub capacity: DeviceCapacity,

    /// Type and hardware details
    #[serde(default)]
    pub details: DeviceDetails,

    /// Filesystem currently on the device, if any
    #[serde(default)]
    pub filesystem: FileSystemInfo,

    /// Position in the device hierarchy
    #[serde(default)]
    pub dependents: DeviceDependents,

    /// Claim holding this device
    #[serde(default)]
    pub claim_ref: Option<String>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Node attributes of a block device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributes {
    /// Kubernetes node name
    #[serde(default)]
    pub node_name: String,
}

/// Capacity of a block device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapacity {
    /// Size in bytes
    #[serde(default)]
    pub storage: u64,
    /// Logical sector size in bytes
    #[serde(default)]
    pub logical_sector_size: u32,
    /// Physical sector size in bytes
    #[serde(default)]
    pub physical_sector_size: u32,
}

/// Type and hardware details of a block device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    /// Position in the storage hierarchy
    #[serde(default)]
    pub device_type: DeviceKind,
    /// Media type
    #[serde(default)]
    pub drive_type: DriveType,
    /// Hardware sector size in bytes
    #[serde(default)]
    pub hardware_sector_size: u32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
}

/// Filesystem found on a block device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemInfo {
    #[serde(default)]
    pub fs_type: Option<String>,
    #[serde(default)]
    pub mount_point: Option<String>,
}

impl FileSystemInfo {
    /// No filesystem type and no mountpoint
    pub fn is_empty(&self) -> bool {
        is_blank(&self.fs_type) && is_blank(&self.mount_point)
    }

    /// Both a filesystem type and a mountpoint are present
    pub fn is_mounted_filesystem(&self) -> bool {
        !is_blank(&self.fs_type) && !is_blank(&self.mount_point)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

/// Parent, partitions, holders and slaves of a block device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDependents {
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub partitions: Vec<String>,
    #[serde(default)]
    pub holders: Vec<String>,
    #[serde(default)]
    pub slaves: Vec<String>,
}

/// Media type of a block device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DriveType {
    #[serde(rename = "SSD")]
    Ssd,
    #[serde(rename = "HDD")]
    Hdd,
    #[default]
    Unknown,
}

impl std::fmt::Display for DriveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveType::Ssd => write!(f, "SSD"),
            DriveType::Hdd => write!(f, "HDD"),
            DriveType::Unknown => write!(f, "Unknown"),
        }
    }
}

// =============================================================================
// Device Kind
// =============================================================================

/// md personalities that do not carry a `raid` prefix
const MD_LEVELS: &[&str] = &["linear", "multipath", "faulty", "container"];

/// Role of a device in the storage hierarchy
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DeviceKind {
    #[default]
    Disk,
    Partition,
    Sparse,
    Loop,
    Lvm,
    Crypt,
    /// md array; holds the content of `md/level`, e.g. `raid1`
    Md(String),
    /// device-mapper device whose uuid matched no known rule
    Dm,
}

impl DeviceKind {
    /// md arrays whose level names a RAID personality
    pub fn is_raid(&self) -> bool {
        matches!(self, DeviceKind::Md(level) if level.contains("raid"))
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Disk => write!(f, "disk"),
            DeviceKind::Partition => write!(f, "partition"),
            DeviceKind::Sparse => write!(f, "sparse"),
            DeviceKind::Loop => write!(f, "loop"),
            DeviceKind::Lvm => write!(f, "lvm"),
            DeviceKind::Crypt => write!(f, "crypt"),
            DeviceKind::Md(level) => write!(f, "{}", level),
            DeviceKind::Dm => write!(f, "dm"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "disk" => DeviceKind::Disk,
            "partition" => DeviceKind::Partition,
            "sparse" => DeviceKind::Sparse,
            "loop" => DeviceKind::Loop,
            "lvm" => DeviceKind::Lvm,
            "crypt" => DeviceKind::Crypt,
            "dm" => DeviceKind::Dm,
            level if level.starts_with("raid") || MD_LEVELS.contains(&level) => {
                DeviceKind::Md(level.to_string())
            }
            other => {
                return Err(Error::Configuration(format!(
                    "unknown device type: {}",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for DeviceKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl JsonSchema for DeviceKind {
    fn schema_name() -> String {
        "DeviceKind".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <String as JsonSchema>::json_schema(gen)
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of a BlockDevice
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceStatus {
    /// Claim lifecycle state
    #[serde(default)]
    pub claim_state: ClaimState,

    /// Whether the device is currently present on the node
    #[serde(default)]
    pub state: DeviceState,
}

/// Claim lifecycle of a block device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClaimState {
    #[default]
    Unclaimed,
    Claimed,
    Released,
}

impl std::fmt::Display for ClaimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimState::Unclaimed => write!(f, "Unclaimed"),
            ClaimState::Claimed => write!(f, "Claimed"),
            ClaimState::Released => write!(f, "Released"),
        }
    }
}

/// Presence of a block device on its node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeviceState {
    Active,
    Inactive,
    #[default]
    Unknown,
}

// =============================================================================
// Accessors
// =============================================================================

impl BlockDevice {
    /// Record name for a device discovered on `node`
    pub fn record_name(node: &str, device_name: &str) -> String {
        format!("blockdevice-{}-{}", node, device_name)
            .to_lowercase()
            .replace(['_', '/'], "-")
    }

    /// Attach a status, replacing any existing one
    pub fn with_status(mut self, state: DeviceState, claim_state: ClaimState) -> Self {
        self.status = Some(BlockDeviceStatus { claim_state, state });
        self
    }

    /// Add a label
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels_mut().insert(key.to_string(), value.to_string());
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations_mut()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn state(&self) -> DeviceState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    pub fn claim_state(&self) -> ClaimState {
        self.status.as_ref().map(|s| s.claim_state).unwrap_or_default()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.spec.capacity.storage
    }

    pub fn device_kind(&self) -> &DeviceKind {
        &self.spec.details.device_type
    }

    pub fn is_sparse(&self) -> bool {
        self.spec.details.device_type == DeviceKind::Sparse
    }

    /// Value of a label, if set
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels().get(key).map(String::as_str)
    }

    /// Value of an annotation, if set
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations().get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_round_trips_through_strings() {
        for name in ["disk", "partition", "sparse", "loop", "lvm", "crypt", "dm", "raid1", "linear"] {
            let kind: DeviceKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
        }
        assert!("floppy".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn test_is_raid() {
        assert!(DeviceKind::Md("raid10".into()).is_raid());
        assert!(!DeviceKind::Md("linear".into()).is_raid());
        assert!(!DeviceKind::Lvm.is_raid());
    }

    #[test]
    fn test_record_name() {
        assert_eq!(
            BlockDevice::record_name("Worker_1", "nvme0n1p1"),
            "blockdevice-worker-1-nvme0n1p1"
        );
    }

    #[test]
    fn test_filesystem_info() {
        let empty = FileSystemInfo::default();
        assert!(empty.is_empty());
        assert!(!empty.is_mounted_filesystem());

        let blank = FileSystemInfo {
            fs_type: Some(String::new()),
            mount_point: None,
        };
        assert!(blank.is_empty());

        let mounted = FileSystemInfo {
            fs_type: Some("ext4".into()),
            mount_point: Some("/data".into()),
        };
        assert!(!mounted.is_empty());
        assert!(mounted.is_mounted_filesystem());
    }

    #[test]
    fn test_spec_serializes_device_type_as_string() {
        let spec = BlockDeviceSpec {
            path: "/dev/md0".into(),
            node_attributes: NodeAttributes::default(),
            capacity: DeviceCapacity::default(),
            details: DeviceDetails {
                device_type: DeviceKind::Md("raid1".into()),
                ..Default::default()
            },
            filesystem: FileSystemInfo::default(),
            dependents: DeviceDependents::default(),
            claim_ref: None,
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["details"]["deviceType"], "raid1");

        let back: BlockDeviceSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.details.device_type, DeviceKind::Md("raid1".into()));
    }

    #[test]
    fn test_status_defaults() {
        let bd = BlockDevice::new("bd-1", BlockDeviceSpec {
            path: "/dev/sdb".into(),
            node_attributes: NodeAttributes::default(),
            capacity: DeviceCapacity::default(),
            details: DeviceDetails::default(),
            filesystem: FileSystemInfo::default(),
            dependents: DeviceDependents::default(),
            claim_ref: None,
        });
        assert_eq!(bd.state(), DeviceState::Unknown);
        assert_eq!(bd.claim_state(), ClaimState::Unclaimed);

        let bd = bd
            .with_status(DeviceState::Active, ClaimState::Claimed)
            .with_label(DEVICE_TAG_LABEL, "fast");
        assert_eq!(bd.state(), DeviceState::Active);
        assert_eq!(bd.claim_state(), ClaimState::Claimed);
        assert_eq!(bd.label(DEVICE_TAG_LABEL), Some("fast"));
        assert_eq!(bd.annotation(UUID_SCHEME_ANNOTATION), None);
    }
}
