//! Node Disk Manager
//!
//! Node daemon that discovers block devices, publishes them as inventory
//! records, re-discovers whenever a block device uevent arrives or a
//! watched file (the mount table by default) signals a change, and binds
//! claims to devices.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use node_disk_manager::{
    forward, BlockDevice, BlockDeviceClaim, Change, ClaimBinder, DaemonConfig, EventWatcher,
    HardwareScanner, InventoryRefresher, InventoryStore, KubeInventory, MemoryInventory, Result,
    SparseFileManager, UeventSocket,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Node Disk Manager - block device inventory and claim selection
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "NDM_CONFIG")]
    config: Option<PathBuf>,

    /// Name of this node
    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Namespace holding the inventory records
    #[arg(long, env = "NDM_NAMESPACE")]
    namespace: Option<String>,

    /// sysfs mount point
    #[arg(long, env = "SYSFS_PATH")]
    sysfs_path: Option<PathBuf>,

    /// Directory for sparse file devices
    #[arg(long, env = "SPARSE_FILE_DIR")]
    sparse_dir: Option<PathBuf>,

    /// Number of sparse files to keep
    #[arg(long, env = "SPARSE_FILE_COUNT")]
    sparse_count: Option<u32>,

    /// Size of each sparse file in bytes
    #[arg(long, env = "SPARSE_FILE_SIZE")]
    sparse_size: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one discovery pass and print the report as JSON
    Discover,
    /// Discover, publish and keep watching for changes
    Run,
    /// Select a device for a claim from YAML inventory and claim files
    Claim {
        /// YAML list of BlockDevice records, in inventory order
        #[arg(long)]
        inventory: PathBuf,
        /// YAML BlockDeviceClaim
        #[arg(long)]
        claim: PathBuf,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Node Disk Manager");
    info!("  Version: {}", node_disk_manager::VERSION);
    info!("  Standalone mode: {}", args.standalone);

    match &args.command {
        Command::Claim { inventory, claim } => {
            run_claim(inventory, claim).await.context("claim selection failed")
        }
        Command::Discover => {
            let config = load_config(&args)?;
            let scanner = build_scanner(&config);
            let report = scanner.discover().context("discovery failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Run => {
            let config = load_config(&args)?;
            run_daemon(config, args.standalone)
                .await
                .context("daemon failed")
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<DaemonConfig> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };

    if let Some(node_name) = &args.node_name {
        config.node_name = node_name.clone();
    }
    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(sysfs_path) = &args.sysfs_path {
        config.scanner.sysfs_path = sysfs_path.clone();
    }
    if let Some(dir) = &args.sparse_dir {
        config.sparse.directory = Some(dir.clone());
    }
    if let Some(count) = args.sparse_count {
        config.sparse.count = count;
    }
    if let Some(size) = args.sparse_size {
        config.sparse.size_bytes = size;
    }

    config.validate()?;
    Ok(config)
}

fn build_scanner(config: &DaemonConfig) -> HardwareScanner {
    let scanner = HardwareScanner::new(&config.node_name, config.scanner.clone());
    match SparseFileManager::from_config(&config.sparse) {
        Some(sparse) => scanner.with_sparse(sparse),
        None => scanner,
    }
}

// =============================================================================
// Daemon
// =============================================================================

async fn run_daemon(config: DaemonConfig, standalone: bool) -> Result<()> {
    let store: Arc<dyn InventoryStore> = if standalone {
        Arc::new(MemoryInventory::new())
    } else {
        let client = kube::Client::try_default().await?;
        Arc::new(KubeInventory::new(client, &config.namespace))
    };

    if let Some(sparse) = SparseFileManager::from_config(&config.sparse) {
        sparse.ensure()?;
    }

    let refresher = InventoryRefresher::new(build_scanner(&config), store);
    refresher.refresh().await?;

    let (changes_tx, changes_rx) = mpsc::channel::<Change>(config.watcher.buffer_size);

    if config.watcher.uevents {
        match UeventSocket::open().and_then(|socket| socket.spawn(config.watcher.buffer_size)) {
            Ok(uevents) => {
                forward(uevents, changes_tx.clone());
            }
            Err(e) => warn!("Kernel uevents unavailable, hot-plug goes unnoticed: {}", e),
        }
    }

    let watcher = EventWatcher::new(config.watcher.buffer_size)?;
    for registration in config.watcher.watchers()? {
        let path = registration.file_name().display().to_string();
        if let Err(e) = watcher.add_watcher(registration) {
            warn!("Cannot watch {}: {}", path, e);
        }
    }
    forward(watcher.start()?, changes_tx);

    info!("Node Disk Manager running on {}", config.node_name);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let passes = refresher.run(changes_rx, shutdown).await;

    watcher.close();
    info!("Node Disk Manager shutdown complete after {} refreshes", passes);
    Ok(())
}

// =============================================================================
// Offline Claim
// =============================================================================

async fn run_claim(inventory: &Path, claim: &Path) -> Result<()> {
    let devices: Vec<BlockDevice> = serde_yaml::from_str(&std::fs::read_to_string(inventory)?)?;
    let claim: BlockDeviceClaim = serde_yaml::from_str(&std::fs::read_to_string(claim)?)?;
    let claim_name = kube::ResourceExt::name_any(&claim);

    let binder = ClaimBinder::new(Arc::new(MemoryInventory::with_devices(devices)));
    let bound = binder.bind(&claim_name, &claim.spec).await?;

    println!("{}", serde_json::to_string_pretty(&bound)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = ["hyper=warn", "kube=info", "tower=warn"]
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(
            EnvFilter::from_default_env().add_directive(level.into()),
            EnvFilter::add_directive,
        );

    // Reports go to stdout, logs to stderr
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
