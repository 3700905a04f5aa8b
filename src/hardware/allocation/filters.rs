//! Selection Filters
//!
//! Each filter narrows a candidate list against one aspect of a claim and
//! never mutates its input. Filters whose claim field is unset pass every
//! candidate through, so a pipeline applies uniformly to every claim.

use super::selector::selector_matches;
use crate::crd::{
    BlockDevice, BlockDeviceClaimSpec, ClaimState, DeviceState, VolumeMode, DEVICE_TAG_LABEL,
    HOSTNAME_LABEL, LEGACY_UUID_SCHEME, UUID_SCHEME_ANNOTATION,
};
use crate::error::Result;
use kube::ResourceExt;
use std::fmt;

// =============================================================================
// Selection Request
// =============================================================================

/// How the claim picks its device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode<'c> {
    /// The claim names the device record outright
    Manual(&'c str),
    /// The claim describes the device by its constraints
    Automatic,
}

/// A claim with its requested capacity already parsed
#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'c> {
    pub spec: &'c BlockDeviceClaimSpec,
    pub requested_bytes: u64,
}

impl<'c> SelectionRequest<'c> {
    pub fn from_claim(spec: &'c BlockDeviceClaimSpec) -> Result<Self> {
        Ok(Self {
            spec,
            requested_bytes: spec.requested_bytes()?,
        })
    }

    pub fn mode(&self) -> SelectionMode<'c> {
        match self.spec.manual_device() {
            Some(name) => SelectionMode::Manual(name),
            None => SelectionMode::Automatic,
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

/// One narrowing step of the selection pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Device state is `Active`
    Active,
    /// Claim state is `Unclaimed`
    Unclaimed,
    /// No legacy identity scheme annotation
    NotLegacyUuid,
    /// No empty-valued device tag label
    NonEmptyDeviceTag,
    /// Tagged devices only when the claim selector names the tag label
    UntaggedUnlessSelected,
    /// Claim label selector, if any
    LabelSelector,
    /// Record name equals the manually requested device
    DeviceName,
    /// No sparse file devices
    NotSparse,
    /// Requested device type, if any
    DeviceType,
    /// Requested volume mode, if any
    VolumeMode,
    /// Requested node name and hostname, if any
    NodeAffinity,
    /// Capacity covers the requested bytes
    Capacity,
}

/// Phase-1 filters shared by both modes
const COMMON_FILTERS: [Filter; 6] = [
    Filter::Active,
    Filter::Unclaimed,
    Filter::NotLegacyUuid,
    Filter::NonEmptyDeviceTag,
    Filter::UntaggedUnlessSelected,
    Filter::LabelSelector,
];

/// Ordered Phase-1 filters for a selection mode
pub fn candidate_filters(mode: SelectionMode<'_>) -> Vec<Filter> {
    let mut filters = COMMON_FILTERS.to_vec();
    match mode {
        SelectionMode::Manual(_) => filters.push(Filter::DeviceName),
        SelectionMode::Automatic => filters.extend([
            Filter::NotSparse,
            Filter::DeviceType,
            Filter::VolumeMode,
            Filter::NodeAffinity,
        ]),
    }
    filters
}

impl Filter {
    /// Candidates passing this filter, in input order
    pub fn apply<'a>(
        &self,
        devices: &[&'a BlockDevice],
        request: &SelectionRequest<'_>,
    ) -> Vec<&'a BlockDevice> {
        devices
            .iter()
            .copied()
            .filter(|device| self.accepts(device, request))
            .collect()
    }

    /// Whether a single device passes this filter
    pub fn accepts(&self, device: &BlockDevice, request: &SelectionRequest<'_>) -> bool {
        let spec = request.spec;

        match self {
            Filter::Active => device.state() == DeviceState::Active,
            Filter::Unclaimed => device.claim_state() == ClaimState::Unclaimed,
            Filter::NotLegacyUuid => {
                device.annotation(UUID_SCHEME_ANNOTATION) != Some(LEGACY_UUID_SCHEME)
            }
            Filter::NonEmptyDeviceTag => device.label(DEVICE_TAG_LABEL) != Some(""),
            Filter::UntaggedUnlessSelected => {
                spec.selector_references(DEVICE_TAG_LABEL)
                    || device.label(DEVICE_TAG_LABEL).is_none()
            }
            Filter::LabelSelector => spec
                .selector
                .as_ref()
                .map_or(true, |selector| selector_matches(selector, device.labels())),
            Filter::DeviceName => match request.mode() {
                SelectionMode::Manual(name) => device.name_any() == name,
                SelectionMode::Automatic => true,
            },
            Filter::NotSparse => !device.is_sparse(),
            Filter::DeviceType => spec
                .device_type
                .as_deref()
                .filter(|t| !t.is_empty())
                .map_or(true, |wanted| device.device_kind().to_string() == wanted),
            Filter::VolumeMode => {
                let filesystem = &device.spec.filesystem;
                match spec.details.volume_mode {
                    None => true,
                    Some(VolumeMode::Block) => filesystem.is_empty(),
                    Some(VolumeMode::FileSystem) => {
                        let format_matches = match spec.details.fs_type.as_deref() {
                            Some(wanted) if !wanted.is_empty() => {
                                filesystem.fs_type.as_deref() == Some(wanted)
                            }
                            _ => true,
                        };
                        filesystem.is_mounted_filesystem() && format_matches
                    }
                }
            }
            Filter::NodeAffinity => {
                let affinity = &spec.node_attributes;
                let node_matches = affinity
                    .node_name
                    .as_deref()
                    .filter(|n| !n.is_empty())
                    .map_or(true, |n| device.spec.node_attributes.node_name == n);
                let host_matches = affinity
                    .host_name
                    .as_deref()
                    .filter(|h| !h.is_empty())
                    .map_or(true, |h| device.label(HOSTNAME_LABEL) == Some(h));
                node_matches && host_matches
            }
            Filter::Capacity => device.capacity_bytes() >= request.requested_bytes,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Filter::Active => "active",
            Filter::Unclaimed => "unclaimed",
            Filter::NotLegacyUuid => "not-legacy-uuid",
            Filter::NonEmptyDeviceTag => "non-empty-device-tag",
            Filter::UntaggedUnlessSelected => "untagged-unless-selected",
            Filter::LabelSelector => "label-selector",
            Filter::DeviceName => "device-name",
            Filter::NotSparse => "not-sparse",
            Filter::DeviceType => "device-type",
            Filter::VolumeMode => "volume-mode",
            Filter::NodeAffinity => "node-affinity",
            Filter::Capacity => "capacity",
        };
        write!(f, "{}", name)
    }
}
