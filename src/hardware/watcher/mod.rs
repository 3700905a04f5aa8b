//! Event Watcher Module
//!
//! Watches files such as the mount table for readiness changes and listens
//! for kernel block device uevents, streaming both to async consumers.

pub mod epoll;
pub mod events;
pub mod uevent;

pub use epoll::*;
pub use events::*;
pub use uevent::*;
