//! Hardware Module
//!
//! Provides block device discovery, hierarchy classification, event
//! watching and claim selection for a single node.

pub mod allocation;
pub mod classification;
pub mod discovery;
pub mod watcher;

pub use allocation::*;
pub use classification::*;
pub use discovery::*;
pub use watcher::*;
