//! Kernel Uevent Listener
//!
//! Receives kobject uevents over a `NETLINK_KOBJECT_UEVENT` socket so that
//! block devices appearing, vanishing or changing reach the daemon without
//! polling. Only events that can change the inventory are forwarded.

use crate::error::Result;
use nix::errno::Errno;
use nix::sys::socket::{
    bind, recv, setsockopt, socket, sockopt, AddressFamily, MsgFlags, NetlinkAddr, SockFlag,
    SockProtocol, SockType,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Multicast group the kernel broadcasts uevents on
const KERNEL_GROUP: u32 = 1;

/// Upper bound of one kernel uevent datagram
const UEVENT_BUFFER_SIZE: usize = 8192;

/// Socket receive buffer requested for hot-plug bursts
const RECEIVE_BUFFER_BYTES: usize = 1 << 20;

// =============================================================================
// Uevent
// =============================================================================

/// Kernel uevent action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UeventAction {
    Add,
    Remove,
    Change,
    Move,
    Online,
    Offline,
    Bind,
    Unbind,
    Other(String),
}

impl From<&str> for UeventAction {
    fn from(action: &str) -> Self {
        match action {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "change" => Self::Change,
            "move" => Self::Move,
            "online" => Self::Online,
            "offline" => Self::Offline,
            "bind" => Self::Bind,
            "unbind" => Self::Unbind,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for UeventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
            Self::Change => write!(f, "change"),
            Self::Move => write!(f, "move"),
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Bind => write!(f, "bind"),
            Self::Unbind => write!(f, "unbind"),
            Self::Other(other) => write!(f, "{}", other),
        }
    }
}

/// One kernel uevent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uevent {
    pub action: UeventAction,
    pub devpath: PathBuf,
    pub subsystem: String,
    pub devname: Option<String>,
    pub devtype: Option<String>,
    pub seqnum: Option<u64>,
}

impl Uevent {
    /// Parse a kernel datagram: an `action@devpath` header followed by
    /// NUL-separated `KEY=value` pairs
    ///
    /// Messages without that header (udev's own broadcasts) yield `None`.
    pub fn parse(message: &[u8]) -> Option<Self> {
        let mut fields = message
            .split(|byte| *byte == 0)
            .filter(|field| !field.is_empty())
            .map(String::from_utf8_lossy);

        let header = fields.next()?;
        let (action, devpath) = header.split_once('@')?;
        let mut uevent = Uevent {
            action: action.into(),
            devpath: PathBuf::from(devpath),
            subsystem: String::new(),
            devname: None,
            devtype: None,
            seqnum: None,
        };

        for field in fields {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            match key {
                "ACTION" => uevent.action = value.into(),
                "DEVPATH" => uevent.devpath = PathBuf::from(value),
                "SUBSYSTEM" => uevent.subsystem = value.to_string(),
                "DEVNAME" => uevent.devname = Some(value.to_string()),
                "DEVTYPE" => uevent.devtype = Some(value.to_string()),
                "SEQNUM" => uevent.seqnum = value.parse().ok(),
                _ => {}
            }
        }

        Some(uevent)
    }

    pub fn is_block(&self) -> bool {
        self.subsystem == "block"
    }

    /// A block device appeared, vanished, was renamed or changed (e.g. a
    /// rewritten partition table)
    pub fn changes_inventory(&self) -> bool {
        self.is_block()
            && matches!(
                self.action,
                UeventAction::Add | UeventAction::Remove | UeventAction::Change | UeventAction::Move
            )
    }

    /// Kernel device name, falling back to the last devpath component
    pub fn device_name(&self) -> Option<&str> {
        self.devname
            .as_deref()
            .or_else(|| self.devpath.file_name()?.to_str())
    }
}

// =============================================================================
// Netlink Socket
// =============================================================================

/// Non-blocking socket subscribed to kernel uevents
pub struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    pub fn open() -> Result<Self> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            SockProtocol::NetlinkKObjectUEvent,
        )?;

        if let Err(e) = setsockopt(&fd, sockopt::RcvBuf, &RECEIVE_BUFFER_BYTES) {
            debug!("Keeping default uevent receive buffer: {}", e);
        }
        bind(fd.as_raw_fd(), &NetlinkAddr::new(0, KERNEL_GROUP))?;

        info!("Listening for kernel uevents");
        Ok(Self { fd })
    }

    /// Forward inventory-relevant uevents until the receiver is dropped
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self, buffer_size: usize) -> Result<mpsc::Receiver<Uevent>> {
        let fd = AsyncFd::new(self.fd)?;
        let (tx, rx) = mpsc::channel(buffer_size.max(1));

        tokio::spawn(async move {
            if let Err(e) = forward_uevents(fd, tx).await {
                warn!("Uevent listener stopped: {}", e);
            }
        });

        Ok(rx)
    }
}

async fn forward_uevents(fd: AsyncFd<OwnedFd>, tx: mpsc::Sender<Uevent>) -> io::Result<()> {
    let mut buf = vec![0u8; UEVENT_BUFFER_SIZE];

    loop {
        let mut guard = fd.readable().await?;
        let received = match guard.try_io(|inner| {
            recv(inner.as_raw_fd(), &mut buf, MsgFlags::empty()).map_err(io::Error::from)
        }) {
            Ok(result) => result,
            Err(_would_block) => continue,
        };

        let len = match received {
            Ok(len) => len,
            Err(e) if e.raw_os_error() == Some(Errno::ENOBUFS as i32) => {
                warn!("Uevent queue overrun, some device events were lost");
                continue;
            }
            Err(e) => return Err(e),
        };

        let Some(uevent) = Uevent::parse(&buf[..len]) else {
            continue;
        };
        if !uevent.changes_inventory() {
            continue;
        }

        debug!(
            "Uevent {} {} (seq {:?})",
            uevent.action,
            uevent.device_name().unwrap_or("?"),
            uevent.seqnum
        );
        if tx.send(uevent).await.is_err() {
            return Ok(());
        }
    }
}
