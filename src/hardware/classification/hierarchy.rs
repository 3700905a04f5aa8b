//! Hierarchy Aggregator
//!
//! Resolves the dependents of every discovered device and buckets device
//! names into parents, partitions, holders, slaves, LVM volumes, RAID
//! arrays, loop devices and sparse files. The result is a plain value owned
//! by whoever ran the pass.

use crate::crd::{DeviceDependents, DeviceKind};
use crate::hardware::discovery::Device;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// =============================================================================
// Hierarchy
// =============================================================================

/// Device names bucketed by their role in the storage hierarchy
///
/// A name may appear in several buckets, e.g. a disk that is a parent and
/// also a slave of an md array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHierarchy {
    pub parents: Vec<String>,
    pub partitions: Vec<String>,
    pub holders: Vec<String>,
    pub slaves: Vec<String>,
    pub lvms: Vec<String>,
    pub raids: Vec<String>,
    pub loops: Vec<String>,
    pub sparse: Vec<String>,
}

impl DeviceHierarchy {
    /// Total number of bucket entries
    pub fn len(&self) -> usize {
        self.parents.len()
            + self.partitions.len()
            + self.holders.len()
            + self.slaves.len()
            + self.lvms.len()
            + self.raids.len()
            + self.loops.len()
            + self.sparse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A device together with its resolved dependents
#[derive(Debug, Clone)]
pub struct ResolvedDevice<'a> {
    pub device: &'a Device,
    pub dependents: DeviceDependents,
}

// =============================================================================
// Aggregator
// =============================================================================

/// Options for bucketing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Partitions are numbered explicitly and carry the parent/partition
    /// relationship; otherwise disks carry it.
    pub partition_scheme: bool,
}

/// Builds a [`DeviceHierarchy`] from a device list
#[derive(Debug, Clone, Default)]
pub struct HierarchyAggregator {
    options: AggregateOptions,
}

impl HierarchyAggregator {
    pub fn new(options: AggregateOptions) -> Self {
        Self { options }
    }

    /// Resolve and bucket every device
    pub fn aggregate(&self, devices: &[Device]) -> DeviceHierarchy {
        self.bucket(&self.resolve(devices))
    }

    /// Resolve dependents for every device
    ///
    /// Devices whose sysfs entries cannot be read are logged and dropped;
    /// they never abort the pass.
    pub fn resolve<'a>(&self, devices: &'a [Device]) -> Vec<ResolvedDevice<'a>> {
        devices
            .iter()
            .filter_map(|device| {
                let Some(sysfs) = device.sysfs() else {
                    return Some(ResolvedDevice {
                        device,
                        dependents: DeviceDependents::default(),
                    });
                };

                match sysfs.dependents() {
                    Ok(dependents) => Some(ResolvedDevice { device, dependents }),
                    Err(e) => {
                        warn!("Skipping {}: {}", device.name(), e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Bucket already-resolved devices
    pub fn bucket(&self, resolved: &[ResolvedDevice<'_>]) -> DeviceHierarchy {
        let mut hierarchy = DeviceHierarchy::default();

        for ResolvedDevice { device, dependents } in resolved {
            let name = device.name();

            match device.kind() {
                DeviceKind::Sparse => hierarchy.sparse.push(name.to_string()),
                DeviceKind::Loop => {
                    hierarchy.loops.push(name.to_string());
                    hierarchy
                        .partitions
                        .extend(dependents.partitions.iter().cloned());
                }
                DeviceKind::Partition if self.options.partition_scheme => {
                    push_unique(&mut hierarchy.partitions, name);
                    if let Some(parent) = &dependents.parent {
                        push_unique(&mut hierarchy.parents, parent);
                    }
                    hierarchy.holders.extend(dependents.holders.iter().cloned());
                }
                DeviceKind::Disk if !self.options.partition_scheme => {
                    hierarchy.parents.push(name.to_string());
                    hierarchy
                        .partitions
                        .extend(dependents.partitions.iter().cloned());
                }
                DeviceKind::Lvm => {
                    push_unique(&mut hierarchy.lvms, name);
                    hierarchy.slaves.extend(dependents.slaves.iter().cloned());
                    hierarchy.holders.extend(dependents.holders.iter().cloned());
                }
                kind if kind.is_raid() => {
                    push_unique(&mut hierarchy.raids, name);
                    hierarchy.slaves.extend(dependents.slaves.iter().cloned());
                    hierarchy.holders.extend(dependents.holders.iter().cloned());
                }
                kind => debug!("{} ({}) contributes no bucket", name, kind),
            }
        }

        hierarchy
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|existing| existing == name) {
        list.push(name.to_string());
    }
}

/// Names in `all_names` containing `name`, or `[name]` when `all_names` is empty
///
/// A disk with partitions is used through its partitions; a disk without
/// any is used whole.
pub fn partitions_or_self(name: &str, all_names: &[String]) -> Vec<String> {
    if all_names.is_empty() {
        return vec![name.to_string()];
    }

    all_names
        .iter()
        .filter(|candidate| candidate.contains(name))
        .cloned()
        .collect()
}
