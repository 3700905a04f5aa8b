//! Device Classifier
//!
//! Determines a device's role in the storage hierarchy. sysfs topology alone
//! cannot tell an LVM volume from a LUKS volume or a partition on `dm-N`, so
//! device-mapper nodes are classified from their `dm/uuid` content and md
//! arrays from their `md/level`.
//!
//! Classification is never cached across passes: a bare dm device can turn
//! into an LVM volume between two passes.

use crate::crd::DeviceKind;
use crate::error::Result;
use crate::hardware::discovery::{Device, SysfsDevice};
use tracing::debug;

// =============================================================================
// dm uuid rules
// =============================================================================

/// How a rule matches `dm/uuid` content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UuidPattern {
    /// Content starts with the given prefix
    Prefix(&'static str),
    /// Content is `part<N>-` followed by the given prefix
    PartitionOf(&'static str),
}

impl UuidPattern {
    pub fn matches(&self, uuid: &str) -> bool {
        match self {
            UuidPattern::Prefix(prefix) => uuid.starts_with(prefix),
            UuidPattern::PartitionOf(prefix) => {
                let Some(rest) = uuid.strip_prefix("part") else {
                    return false;
                };
                let after_digits = rest.trim_start_matches(|c: char| c.is_ascii_digit());
                after_digits.len() < rest.len()
                    && after_digits
                        .strip_prefix('-')
                        .is_some_and(|inner| inner.starts_with(prefix))
            }
        }
    }
}

/// One `dm/uuid` rule; the first matching rule wins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidRule {
    pub pattern: UuidPattern,
    pub kind: DeviceKind,
}

/// Built-in device-mapper subtypes
pub const DM_UUID_RULES: &[UuidRule] = &[
    UuidRule {
        pattern: UuidPattern::Prefix("LVM-"),
        kind: DeviceKind::Lvm,
    },
    UuidRule {
        pattern: UuidPattern::PartitionOf("LVM-"),
        kind: DeviceKind::Partition,
    },
    UuidRule {
        pattern: UuidPattern::Prefix("CRYPT-LUKS"),
        kind: DeviceKind::Crypt,
    },
    UuidRule {
        pattern: UuidPattern::PartitionOf("CRYPT-LUKS"),
        kind: DeviceKind::Partition,
    },
];

// =============================================================================
// Device Classifier
// =============================================================================

/// Classifies block devices into [`DeviceKind`]s
#[derive(Debug, Clone)]
pub struct DeviceClassifier {
    rules: Vec<UuidRule>,
}

impl DeviceClassifier {
    /// Create a classifier with the built-in rules
    pub fn new() -> Self {
        Self {
            rules: DM_UUID_RULES.to_vec(),
        }
    }

    /// Create a classifier with additional rules, tried after the built-in ones
    pub fn with_rules(extra: impl IntoIterator<Item = UuidRule>) -> Self {
        let mut classifier = Self::new();
        classifier.rules.extend(extra);
        classifier
    }

    /// Classify a discovered device; sparse devices never touch sysfs
    pub fn classify_device(&self, device: &Device) -> Result<DeviceKind> {
        match device.sysfs() {
            Some(sysfs) => self.classify(sysfs),
            None => Ok(DeviceKind::Sparse),
        }
    }

    /// Classify a device from its sysfs view
    pub fn classify(&self, device: &SysfsDevice) -> Result<DeviceKind> {
        let name = device.name();

        if name.starts_with("dm-") {
            let kind = match device.dm_uuid()? {
                Some(uuid) => self.classify_dm_uuid(&uuid),
                None => None,
            };
            debug!("Classified {} from dm uuid as {:?}", name, kind);
            return Ok(kind.unwrap_or(DeviceKind::Dm));
        }

        if name.starts_with("md") {
            if let Some(level) = device.md_level()?.filter(|l| !l.is_empty()) {
                return Ok(DeviceKind::Md(level));
            }
        }

        if device.dev_path().starts_with("/dev") && name.starts_with("loop") {
            return Ok(DeviceKind::Loop);
        }

        Ok(match device.parent() {
            Some(_) => DeviceKind::Partition,
            None => DeviceKind::Disk,
        })
    }

    /// Match `dm/uuid` content against the rule table
    pub fn classify_dm_uuid(&self, uuid: &str) -> Option<DeviceKind> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(uuid))
            .map(|rule| rule.kind.clone())
    }
}

impl Default for DeviceClassifier {
    fn default() -> Self {
        Self::new()
    }
}
