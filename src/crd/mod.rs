//! Custom Resource Definitions for the Node Disk Manager
//!
//! This module contains all CRD types:
//! - BlockDevice: inventory record for one block device on a node
//! - BlockDeviceClaim: request for exclusive use of one block device

pub mod block_device;
pub mod block_device_claim;

pub use block_device::*;
pub use block_device_claim::*;
