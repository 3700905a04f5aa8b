//! Node Disk Manager - Block Device Inventory
//!
//! A node daemon that turns the Linux block device tree into inventory
//! records and binds claims to them.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          Node Daemon                               │
//! ├────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌────────────────┐  │
//! │  │  Sysfs Resolver  │──▶│   Classifier +   │──▶│   Inventory    │  │
//! │  │  + Sparse Files  │   │   Aggregator     │   │   Records      │  │
//! │  └──────────────────┘   └──────────────────┘   └───────┬────────┘  │
//! │           ▲                                            │           │
//! │  ┌────────┴─────────┐                          ┌───────▼────────┐  │
//! │  │  Event Watcher   │                          │ Claim Selection│  │
//! │  │ (epoll + uevent) │                          │    Engine      │  │
//! │  └──────────────────┘                          └────────────────┘  │
//! ├────────────────────────────────────────────────────────────────────┤
//! │             Inventory Store (in-memory | Kubernetes)               │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`hardware`]: Discovery, classification, event watching and selection
//! - [`controlplane`]: Inventory store adapters, refresh loop and the claim binder
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Port traits
//! - [`config`]: Daemon configuration
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod hardware;

// Re-export commonly used types
pub use config::{DaemonConfig, WatchPath, WatcherConfig};

pub use controlplane::{
    forward, publish_report, Change, ClaimBinder, InventoryRefresher, KubeInventory,
    MemoryInventory, PublishSummary,
};

pub use crd::{
    BlockDevice, BlockDeviceClaim, BlockDeviceClaimSpec, BlockDeviceSpec, BlockDeviceStatus,
    ClaimState, DeviceKind, DeviceState, DriveType, VolumeMode,
};

pub use domain::ports::InventoryStore;

pub use error::{Error, ErrorAction, Result};

pub use hardware::{
    partitions_or_self, select_device, DeviceClassifier, DeviceHierarchy, DiscoveryReport,
    Event, EventType, EventWatcher, Filter, HardwareScanner, HierarchyAggregator,
    ScannerConfig, SelectionMode, SparseFileManager, SysfsDevice, Uevent, UeventSocket,
    Watcher,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
