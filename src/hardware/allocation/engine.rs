//! Claim Selection Engine
//!
//! Picks the block device a claim binds to in two phases. Phase 1 narrows
//! the inventory with the structural filters of the claim's selection mode.
//! Phase 2 returns the first candidate in manual mode, or the first one
//! whose capacity covers the request in automatic mode.
//!
//! Selection is first-fit over inventory order, never best-fit: the result
//! depends on the order in which the inventory lists its devices.

use super::filters::{candidate_filters, Filter, SelectionMode, SelectionRequest};
use crate::crd::{BlockDevice, BlockDeviceClaimSpec};
use crate::error::{Error, Result};
use kube::ResourceExt;
use tracing::{debug, info};

/// Select the device a claim should bind to
pub fn select_device<'a>(
    inventory: &'a [BlockDevice],
    claim: &BlockDeviceClaimSpec,
) -> Result<&'a BlockDevice> {
    if inventory.is_empty() {
        return Err(Error::EmptyInventory);
    }

    let request = SelectionRequest::from_claim(claim)?;
    let mode = request.mode();

    let candidates = narrow_candidates(inventory, &request);
    if candidates.is_empty() {
        return Err(Error::NoMatchingDevices);
    }

    let selected = match mode {
        SelectionMode::Manual(_) => candidates[0],
        SelectionMode::Automatic => {
            let fitting = Filter::Capacity.apply(&candidates, &request);
            *fitting.first().ok_or(Error::NoDeviceWithResources {
                requested: request.requested_bytes,
            })?
        }
    };

    info!(
        "Selected block device {} ({:?} mode, {} candidates)",
        selected.name_any(),
        mode,
        candidates.len()
    );
    Ok(selected)
}

/// Run the Phase-1 pipeline for the request's mode
pub fn narrow_candidates<'a>(
    inventory: &'a [BlockDevice],
    request: &SelectionRequest<'_>,
) -> Vec<&'a BlockDevice> {
    let mut candidates: Vec<&BlockDevice> = inventory.iter().collect();

    for filter in candidate_filters(request.mode()) {
        candidates = filter.apply(&candidates, request);
        debug!("{} candidates after {} filter", candidates.len(), filter);
        if candidates.is_empty() {
            break;
        }
    }

    candidates
}
