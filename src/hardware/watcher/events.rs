//! Watch Registrations and Events
//!
//! Interest flags share their bit values with the epoll event mask, so a
//! registration converts to and from the kernel representation without a
//! lookup table.

use crate::error::{Error, Result};
use enumflags2::{bitflags, BitFlags};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Interest flags a watcher can register for
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Data available to read (`EPOLLIN`)
    Readable = 0x001,
    /// Exceptional condition, e.g. a mount table change (`EPOLLPRI`)
    Priority = 0x002,
    /// Ready for writing (`EPOLLOUT`)
    Writable = 0x004,
    /// Error condition (`EPOLLERR`)
    Error = 0x008,
    /// Peer closed its end (`EPOLLHUP`)
    Hangup = 0x010,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Readable => write!(f, "readable"),
            EventType::Priority => write!(f, "priority"),
            EventType::Writable => write!(f, "writable"),
            EventType::Error => write!(f, "error"),
            EventType::Hangup => write!(f, "hangup"),
        }
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "readable" | "in" => Ok(EventType::Readable),
            "priority" | "pri" => Ok(EventType::Priority),
            "writable" | "out" => Ok(EventType::Writable),
            "error" | "err" => Ok(EventType::Error),
            "hangup" | "hup" => Ok(EventType::Hangup),
            _ => Err(Error::UnknownEventType {
                name: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Watcher
// =============================================================================

/// A file plus the events it is watched for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watcher {
    file_name: PathBuf,
    events: BitFlags<EventType>,
}

impl Watcher {
    pub fn new(file_name: impl Into<PathBuf>, events: impl Into<BitFlags<EventType>>) -> Self {
        Self {
            file_name: file_name.into(),
            events: events.into(),
        }
    }

    /// Build from a raw mask, rejecting bits outside the legal set
    pub fn from_mask(file_name: impl Into<PathBuf>, mask: u32) -> Result<Self> {
        let events =
            BitFlags::<EventType>::from_bits(mask).map_err(|_| Error::InvalidEventType { bits: mask })?;

        Ok(Self::new(file_name, events))
    }

    /// Build from event names such as `["priority", "error"]`
    pub fn from_names<S: AsRef<str>>(file_name: impl Into<PathBuf>, names: &[S]) -> Result<Self> {
        let mut events = BitFlags::<EventType>::empty();
        for name in names {
            events |= name.as_ref().parse::<EventType>()?;
        }

        Ok(Self::new(file_name, events))
    }

    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    pub fn events(&self) -> BitFlags<EventType> {
        self.events
    }

    /// Interest mask as passed to the kernel
    pub fn mask(&self) -> u32 {
        self.events.bits()
    }
}

// =============================================================================
// Event
// =============================================================================

/// A readiness notification for one watched file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub file_name: PathBuf,
    pub events: BitFlags<EventType>,
}

impl Event {
    /// Event from a kernel-reported mask; bits outside the legal set are dropped
    pub fn from_raw(file_name: PathBuf, mask: u32) -> Self {
        Self {
            file_name,
            events: BitFlags::from_bits_truncate(mask),
        }
    }

    pub fn contains(&self, event: EventType) -> bool {
        self.events.contains(event)
    }
}
