//! Claim Binder
//!
//! Binds claims to block devices: lists the inventory, runs the selection
//! engine and marks the chosen device as claimed.

use crate::crd::{BlockDevice, BlockDeviceClaimSpec, ClaimState};
use crate::domain::ports::InventoryStore;
use crate::error::{Error, Result};
use crate::hardware::allocation::select_device;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{info, warn};

/// Binds claims against an inventory store
pub struct ClaimBinder {
    store: Arc<dyn InventoryStore>,
}

impl ClaimBinder {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Select a device for `claim_name` and mark it claimed
    pub async fn bind(&self, claim_name: &str, claim: &BlockDeviceClaimSpec) -> Result<BlockDevice> {
        let inventory = self.store.list_block_devices().await?;

        let selected = match select_device(&inventory, claim) {
            Ok(device) => device.clone(),
            Err(e) => {
                warn!("No device for claim {}: {} ({:?})", claim_name, e, e.action());
                return Err(e);
            }
        };
        let name = selected.name_any();

        // The snapshot may be stale; re-check right before claiming
        if let Some(current) = self.store.get_block_device(&name).await? {
            if current.claim_state() != ClaimState::Unclaimed {
                return Err(Error::DeviceAlreadyClaimed { device: name });
            }
        }

        self.store
            .set_claim_state(&name, ClaimState::Claimed, Some(claim_name))
            .await?;

        info!("Bound claim {} to block device {}", claim_name, name);
        self.store
            .get_block_device(&name)
            .await?
            .ok_or(Error::ResourceNotFound {
                kind: "BlockDevice".into(),
                name,
            })
    }

    /// Release the device held by `claim_name`
    pub async fn release(&self, claim_name: &str) -> Result<Option<String>> {
        let inventory = self.store.list_block_devices().await?;

        let Some(device) = inventory
            .iter()
            .find(|d| d.spec.claim_ref.as_deref() == Some(claim_name))
        else {
            return Ok(None);
        };
        let name = device.name_any();

        self.store
            .set_claim_state(&name, ClaimState::Released, None)
            .await?;
        info!("Released block device {} from claim {}", name, claim_name);
        Ok(Some(name))
    }
}
