//! Inventory Refresher
//!
//! Keeps the published inventory current: every watched-file event and
//! every block device uevent (hot-plug, removal, partition table change)
//! leads to a discovery pass whose report is published to the store.
//! Bursts are coalesced into one pass.

use super::inventory::{publish_report, PublishSummary};
use crate::domain::ports::InventoryStore;
use crate::error::{Error, Result};
use crate::hardware::discovery::HardwareScanner;
use crate::hardware::watcher::{Event, Uevent};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// =============================================================================
// Changes
// =============================================================================

/// Something that may have changed the node's devices
#[derive(Debug, Clone)]
pub enum Change {
    /// A watched file became ready
    File(Event),
    /// Kernel uevent
    Device(Uevent),
}

impl Change {
    pub fn requires_discovery(&self) -> bool {
        match self {
            Change::File(_) => true,
            Change::Device(uevent) => uevent.changes_inventory(),
        }
    }
}

impl From<Event> for Change {
    fn from(event: Event) -> Self {
        Change::File(event)
    }
}

impl From<Uevent> for Change {
    fn from(uevent: Uevent) -> Self {
        Change::Device(uevent)
    }
}

/// Pipe a source channel into the change stream until either side closes
pub fn forward<T>(mut source: mpsc::Receiver<T>, changes: mpsc::Sender<Change>) -> JoinHandle<()>
where
    T: Into<Change> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = source.recv().await {
            if changes.send(item.into()).await.is_err() {
                break;
            }
        }
    })
}

// =============================================================================
// Refresher
// =============================================================================

/// Runs discovery passes and publishes their reports
pub struct InventoryRefresher {
    scanner: Arc<HardwareScanner>,
    store: Arc<dyn InventoryStore>,
}

impl InventoryRefresher {
    pub fn new(scanner: HardwareScanner, store: Arc<dyn InventoryStore>) -> Self {
        Self {
            scanner: Arc::new(scanner),
            store,
        }
    }

    /// One discovery pass on the blocking pool, then publish
    pub async fn refresh(&self) -> Result<PublishSummary> {
        let scanner = Arc::clone(&self.scanner);
        let report = tokio::task::spawn_blocking(move || scanner.discover())
            .await
            .map_err(|e| Error::Internal(format!("discovery task failed: {}", e)))??;

        publish_report(self.store.as_ref(), &report).await
    }

    /// Refresh on every relevant change until `shutdown` resolves or all
    /// change sources are gone; returns the number of passes run
    ///
    /// A failed pass is logged and the loop keeps going.
    pub async fn run<F>(&self, mut changes: mpsc::Receiver<Change>, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut passes = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                change = changes.recv() => {
                    let Some(change) = change else {
                        warn!("All change sources closed");
                        break;
                    };

                    debug!("Change: {:?}", change);
                    let mut pending = change.requires_discovery();
                    while let Ok(next) = changes.try_recv() {
                        pending |= next.requires_discovery();
                    }
                    if !pending {
                        continue;
                    }

                    passes += 1;
                    match self.refresh().await {
                        Ok(summary) => debug!(
                            "Pass {}: {} published, {} deactivated",
                            passes, summary.published, summary.deactivated
                        ),
                        Err(e) => error!("Discovery failed: {}", e),
                    }
                }
            }
        }

        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::MemoryInventory;
    use crate::crd::{BlockDevice, DeviceState};
    use crate::hardware::discovery::{ScannerConfig, CLASS_BLOCK};
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::Path;
    use tempfile::TempDir;

    fn plug(root: &Path, name: &str) {
        let sys = root.join("devices/pci0000:00/ata1/host0/block").join(name);
        fs::create_dir_all(&sys).unwrap();
        fs::write(sys.join("size"), "2097152").unwrap();

        let class = root.join(CLASS_BLOCK);
        fs::create_dir_all(&class).unwrap();
        symlink(&sys, class.join(name)).unwrap();
    }

    fn unplug(root: &Path, name: &str) {
        fs::remove_file(root.join(CLASS_BLOCK).join(name)).unwrap();
    }

    fn uevent(action: &str, name: &str, subsystem: &str) -> Change {
        let message = format!(
            "{action}@/devices/pci0000:00/ata1/host0/block/{name}\0ACTION={action}\0SUBSYSTEM={subsystem}\0DEVNAME={name}\0"
        );
        Change::Device(Uevent::parse(message.as_bytes()).unwrap())
    }

    fn refresher(root: &Path, store: Arc<MemoryInventory>) -> InventoryRefresher {
        let scanner = HardwareScanner::new(
            "node-1",
            ScannerConfig {
                sysfs_path: root.to_path_buf(),
                mounts_path: root.join("mounts"),
                dev_dir: root.join("dev"),
                ..Default::default()
            },
        );
        InventoryRefresher::new(scanner, store)
    }

    async fn state_of(store: &MemoryInventory, device: &str) -> Option<DeviceState> {
        store
            .get_block_device(&BlockDevice::record_name("node-1", device))
            .await
            .unwrap()
            .map(|record| record.state())
    }

    #[tokio::test]
    async fn test_hot_plug_and_removal_refresh_inventory() {
        let tmp = TempDir::new().unwrap();
        plug(tmp.path(), "sdb");
        let store = Arc::new(MemoryInventory::new());
        let refresher = refresher(tmp.path(), store.clone());

        refresher.refresh().await.unwrap();
        assert_eq!(store.len(), 1);

        plug(tmp.path(), "sdc");
        let (tx, rx) = mpsc::channel(8);
        tx.send(uevent("add", "sdc", "block")).await.unwrap();
        drop(tx);
        assert_eq!(refresher.run(rx, std::future::pending()).await, 1);
        assert_eq!(state_of(&store, "sdc").await, Some(DeviceState::Active));

        unplug(tmp.path(), "sdc");
        let (tx, rx) = mpsc::channel(8);
        tx.send(uevent("remove", "sdc", "block")).await.unwrap();
        drop(tx);
        assert_eq!(refresher.run(rx, std::future::pending()).await, 1);
        assert_eq!(state_of(&store, "sdc").await, Some(DeviceState::Inactive));
        assert_eq!(state_of(&store, "sdb").await, Some(DeviceState::Active));
    }

    #[tokio::test]
    async fn test_unrelated_uevents_are_ignored() {
        let tmp = TempDir::new().unwrap();
        plug(tmp.path(), "sdb");
        let store = Arc::new(MemoryInventory::new());
        let refresher = refresher(tmp.path(), store.clone());

        let (tx, rx) = mpsc::channel(8);
        tx.send(uevent("add", "veth0", "net")).await.unwrap();
        tx.send(uevent("bind", "sdb", "block")).await.unwrap();
        drop(tx);

        assert_eq!(refresher.run(rx, std::future::pending()).await, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_burst_is_coalesced() {
        let tmp = TempDir::new().unwrap();
        plug(tmp.path(), "sdb");
        let store = Arc::new(MemoryInventory::new());
        let refresher = refresher(tmp.path(), store.clone());

        let (tx, rx) = mpsc::channel(8);
        for name in ["sdb", "sdb1", "sdb2"] {
            tx.send(uevent("change", name, "block")).await.unwrap();
        }
        tx.send(Change::File(Event::from_raw("/proc/1/mounts".into(), 0x2)))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(refresher.run(rx, std::future::pending()).await, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_forward_feeds_change_stream() {
        let (uevent_tx, uevent_rx) = mpsc::channel(4);
        let (changes_tx, mut changes_rx) = mpsc::channel(4);
        let handle = forward::<Uevent>(uevent_rx, changes_tx);

        let Change::Device(expected) = uevent("add", "sdd", "block") else {
            unreachable!()
        };
        uevent_tx.send(expected.clone()).await.unwrap();
        drop(uevent_tx);

        assert!(matches!(changes_rx.recv().await, Some(Change::Device(u)) if u == expected));
        handle.await.unwrap();
        assert!(changes_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryInventory::new());
        let refresher = refresher(tmp.path(), store);

        let (_tx, rx) = mpsc::channel::<Change>(1);
        assert_eq!(refresher.run(rx, async {}).await, 0);
    }
}
