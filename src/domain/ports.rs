//! Domain Ports - Core trait definitions for the disk manager
//!
//! These traits define the boundaries between discovery/selection and the
//! system that stores the device inventory. Adapters implement these traits
//! to provide concrete functionality.

use crate::crd::{BlockDevice, ClaimState, DeviceState};
use crate::error::Result;
use async_trait::async_trait;

// =============================================================================
// Inventory Store Port
// =============================================================================

/// Port for reading and updating the block device inventory
///
/// Implementations must return records in a stable order; automatic claim
/// selection is first-fit over that order.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// All records, in inventory order
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>>;

    /// Get a record by name
    async fn get_block_device(&self, name: &str) -> Result<Option<BlockDevice>>;

    /// Create or update a discovered record
    ///
    /// An existing record keeps its claim state and claim reference.
    async fn publish_block_device(&self, device: BlockDevice) -> Result<()>;

    /// Update whether the device is present on its node
    async fn set_device_state(&self, name: &str, state: DeviceState) -> Result<()>;

    /// Update the claim state and the claim holding the device
    async fn set_claim_state(
        &self,
        name: &str,
        state: ClaimState,
        claim: Option<&str>,
    ) -> Result<()>;
}
