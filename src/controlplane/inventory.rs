//! Inventory Store Adapters
//!
//! An ordered in-memory store for standalone mode and tests, and a store
//! backed by `BlockDevice` custom resources.

use crate::crd::{BlockDevice, BlockDeviceStatus, ClaimState, DeviceState};
use crate::domain::ports::InventoryStore;
use crate::error::{Error, Result};
use crate::hardware::discovery::DiscoveryReport;
use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, info};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "node-disk-manager";

// =============================================================================
// Memory Inventory
// =============================================================================

/// In-memory inventory; records keep insertion order
#[derive(Debug, Default)]
pub struct MemoryInventory {
    devices: RwLock<Vec<BlockDevice>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inventory pre-populated in the given order
    pub fn with_devices(devices: Vec<BlockDevice>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    fn update<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut BlockDevice),
    {
        let mut devices = self.devices.write();
        let device = devices
            .iter_mut()
            .find(|d| d.name_any() == name)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "BlockDevice".into(),
                name: name.into(),
            })?;

        f(device);
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for MemoryInventory {
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>> {
        Ok(self.devices.read().clone())
    }

    async fn get_block_device(&self, name: &str) -> Result<Option<BlockDevice>> {
        Ok(self
            .devices
            .read()
            .iter()
            .find(|d| d.name_any() == name)
            .cloned())
    }

    async fn publish_block_device(&self, mut device: BlockDevice) -> Result<()> {
        let name = device.name_any();
        let mut devices = self.devices.write();

        match devices.iter_mut().find(|d| d.name_any() == name) {
            Some(existing) => {
                device.spec.claim_ref = existing.spec.claim_ref.take();
                let state = device.state();
                device.status = Some(BlockDeviceStatus {
                    claim_state: existing.claim_state(),
                    state,
                });
                *existing = device;
                debug!("Updated block device {}", name);
            }
            None => {
                devices.push(device);
                debug!("Added block device {}", name);
            }
        }

        Ok(())
    }

    async fn set_device_state(&self, name: &str, state: DeviceState) -> Result<()> {
        self.update(name, |device| {
            device.status.get_or_insert_with(Default::default).state = state;
        })
    }

    async fn set_claim_state(
        &self,
        name: &str,
        state: ClaimState,
        claim: Option<&str>,
    ) -> Result<()> {
        self.update(name, |device| {
            device.status.get_or_insert_with(Default::default).claim_state = state;
            device.spec.claim_ref = claim.map(str::to_string);
        })
    }
}

// =============================================================================
// Kubernetes Inventory
// =============================================================================

/// Inventory stored as namespaced `BlockDevice` resources
pub struct KubeInventory {
    api: Api<BlockDevice>,
}

impl KubeInventory {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    async fn patch_status(&self, name: &str, status: serde_json::Value) -> Result<()> {
        self.api
            .patch_status(
                name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "status": status })),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for KubeInventory {
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get_block_device(&self, name: &str) -> Result<Option<BlockDevice>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn publish_block_device(&self, mut device: BlockDevice) -> Result<()> {
        let name = device.name_any();
        let existing = self.api.get_opt(&name).await?;

        let claim_state = match &existing {
            Some(existing) => {
                device.spec.claim_ref = existing.spec.claim_ref.clone();
                existing.claim_state()
            }
            None => ClaimState::Unclaimed,
        };
        let state = device.state();
        device.status = None;
        device.metadata.managed_fields = None;
        device.metadata.resource_version = None;

        self.api
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&device),
            )
            .await?;
        self.patch_status(
            &name,
            json!({ "claimState": claim_state, "state": state }),
        )
        .await?;

        debug!("Applied block device {}", name);
        Ok(())
    }

    async fn set_device_state(&self, name: &str, state: DeviceState) -> Result<()> {
        self.patch_status(name, json!({ "state": state })).await
    }

    async fn set_claim_state(
        &self,
        name: &str,
        state: ClaimState,
        claim: Option<&str>,
    ) -> Result<()> {
        self.api
            .patch(
                name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "spec": { "claimRef": claim } })),
            )
            .await?;
        self.patch_status(name, json!({ "claimState": state })).await
    }
}

// =============================================================================
// Report Publishing
// =============================================================================

/// Outcome of publishing one discovery report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: usize,
    pub deactivated: usize,
}

/// Publish every record of a report and mark this node's records that
/// were not rediscovered as inactive
pub async fn publish_report(
    store: &dyn InventoryStore,
    report: &DiscoveryReport,
) -> Result<PublishSummary> {
    let mut summary = PublishSummary::default();
    let mut seen = HashSet::with_capacity(report.devices.len());

    for device in &report.devices {
        seen.insert(device.name_any());
        store.publish_block_device(device.clone()).await?;
        summary.published += 1;
    }

    for existing in store.list_block_devices().await? {
        let name = existing.name_any();
        if existing.spec.node_attributes.node_name == report.node_name
            && !seen.contains(&name)
            && existing.state() != DeviceState::Inactive
        {
            store.set_device_state(&name, DeviceState::Inactive).await?;
            summary.deactivated += 1;
        }
    }

    info!(
        "Published {} block devices for {}, {} marked inactive",
        summary.published, report.node_name, summary.deactivated
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::BlockDeviceSpec;
    use crate::hardware::classification::DeviceHierarchy;
    use assert_matches::assert_matches;

    fn device(name: &str, node: &str) -> BlockDevice {
        let mut spec = BlockDeviceSpec::default();
        spec.path = format!("/dev/{}", name);
        spec.node_attributes.node_name = node.into();
        BlockDevice::new(name, spec).with_status(DeviceState::Active, ClaimState::Unclaimed)
    }

    fn report(node: &str, devices: Vec<BlockDevice>) -> DiscoveryReport {
        DiscoveryReport {
            node_name: node.into(),
            hierarchy: DeviceHierarchy::default(),
            devices,
            discovered_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_keeps_order_and_claim_state() {
        let store = MemoryInventory::new();
        store.publish_block_device(device("sda", "n1")).await.unwrap();
        store.publish_block_device(device("sdb", "n1")).await.unwrap();
        store
            .set_claim_state("sda", ClaimState::Claimed, Some("bdc-1"))
            .await
            .unwrap();

        let mut rediscovered = device("sda", "n1");
        rediscovered.spec.capacity.storage = 42;
        store.publish_block_device(rediscovered).await.unwrap();

        let devices = store.list_block_devices().await.unwrap();
        let names: Vec<String> = devices.iter().map(|d| d.name_any()).collect();
        assert_eq!(names, vec!["sda", "sdb"]);
        assert_eq!(devices[0].capacity_bytes(), 42);
        assert_eq!(devices[0].claim_state(), ClaimState::Claimed);
        assert_eq!(devices[0].spec.claim_ref.as_deref(), Some("bdc-1"));
    }

    #[tokio::test]
    async fn test_update_missing_device() {
        let store = MemoryInventory::new();
        assert_matches!(
            store.set_device_state("sdz", DeviceState::Inactive).await,
            Err(Error::ResourceNotFound { .. })
        );
        assert!(store.get_block_device("sdz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_report_deactivates_vanished_devices() {
        let store = MemoryInventory::with_devices(vec![
            device("sda", "n1"),
            device("sdb", "n1"),
            device("sdc", "n2"),
        ]);

        let summary = publish_report(&store, &report("n1", vec![device("sda", "n1")]))
            .await
            .unwrap();
        assert_eq!(
            summary,
            PublishSummary {
                published: 1,
                deactivated: 1
            }
        );

        let sdb = store.get_block_device("sdb").await.unwrap().unwrap();
        assert_eq!(sdb.state(), DeviceState::Inactive);
        let sdc = store.get_block_device("sdc").await.unwrap().unwrap();
        assert_eq!(sdc.state(), DeviceState::Active);

        // Already inactive records are left alone
        let summary = publish_report(&store, &report("n1", vec![device("sda", "n1")]))
            .await
            .unwrap();
        assert_eq!(summary.deactivated, 0);
    }
}
