//! BlockDeviceClaim CRD
//!
//! A request for exclusive use of one block device meeting the stated
//! constraints. Either names the device outright (manual selection) or
//! describes it by capacity, type, volume mode, node and labels.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Resource key carrying the requested capacity
pub const STORAGE_RESOURCE: &str = "storage";

// =============================================================================
// BlockDeviceClaim CRD
// =============================================================================

/// BlockDeviceClaim asks for one block device on some node.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1alpha1",
    kind = "BlockDeviceClaim",
    plural = "blockdeviceclaims",
    shortname = "bdc",
    status = "BlockDeviceClaimStatus",
    namespaced,
    printcolumn = r#"{"name": "BlockDevice", "type": "string", "jsonPath": ".status.blockDevice"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceClaimSpec {
    /// Exact device to claim; switches selection to manual mode
    #[serde(default)]
    pub block_device_name: Option<String>,

    /// Label constraints on the device record
    #[serde(default)]
    pub selector: Option<LabelSelector>,

    /// Requested resources, e.g. `storage: 10Gi`
    #[serde(default)]
    pub resources: DeviceClaimResources,

    /// Requested device type, e.g. `disk` or `partition`
    #[serde(default)]
    pub device_type: Option<String>,

    /// Volume mode and filesystem requirements
    #[serde(default)]
    pub details: DeviceClaimDetails,

    /// Host affinity
    #[serde(default)]
    pub node_attributes: ClaimNodeAttributes,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Requested resources of a claim
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceClaimResources {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

/// Volume mode requirements of a claim
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceClaimDetails {
    #[serde(default)]
    pub volume_mode: Option<VolumeMode>,

    /// Required filesystem format when `volume_mode` is `FileSystemMode`
    #[serde(default)]
    pub fs_type: Option<String>,
}

/// How the claimed device will be consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum VolumeMode {
    /// Raw device; must carry no filesystem and no mountpoint
    #[serde(rename = "BlockMode")]
    Block,
    /// Formatted and mounted device
    #[serde(rename = "FileSystemMode")]
    FileSystem,
}

/// Host affinity of a claim
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimNodeAttributes {
    /// Kubernetes node name
    #[serde(default)]
    pub node_name: Option<String>,

    /// Value of the `kubernetes.io/hostname` label
    #[serde(default)]
    pub host_name: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of a BlockDeviceClaim
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceClaimStatus {
    #[serde(default)]
    pub phase: ClaimPhase,

    /// Device bound to this claim
    #[serde(default)]
    pub block_device: Option<String>,

    /// Last selection failure
    #[serde(default)]
    pub reason: Option<String>,
}

/// Claim lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClaimPhase {
    #[default]
    Pending,
    Bound,
    Released,
}

// =============================================================================
// Helpers
// =============================================================================

impl BlockDeviceClaimSpec {
    /// Device named for manual selection, if any
    pub fn manual_device(&self) -> Option<&str> {
        self.block_device_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Requested capacity in bytes; zero when nothing was requested
    pub fn requested_bytes(&self) -> Result<u64> {
        match self.resources.requests.get(STORAGE_RESOURCE) {
            Some(quantity) => parse_quantity(quantity),
            None => Ok(0),
        }
    }

    /// Whether the selector mentions `key` in its labels or expressions
    pub fn selector_references(&self, key: &str) -> bool {
        let Some(selector) = &self.selector else {
            return false;
        };

        let in_labels = selector
            .match_labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(key));

        let in_expressions = selector
            .match_expressions
            .as_ref()
            .is_some_and(|exprs| exprs.iter().any(|expr| expr.key == key));

        in_labels || in_expressions
    }
}

/// Parse a Kubernetes quantity (e.g. "10Gi", "500M", "1073741824") to bytes
pub fn parse_quantity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty capacity string".into()));
    }

    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = &s[num_end..];

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number: {}", num_str)))?;

    let multiplier: u64 = match unit_str {
        "" => 1,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "k" | "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        _ => {
            return Err(Error::CapacityParse(format!(
                "unknown unit: {}",
                unit_str
            )))
        }
    };

    Ok((num * multiplier as f64).ceil() as u64)
}
