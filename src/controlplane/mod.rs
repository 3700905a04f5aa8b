//! Control Plane Module
//!
//! Connects discovery and claim selection to the inventory store and keeps
//! the store current as devices change.

pub mod binder;
pub mod inventory;
pub mod refresh;

pub use binder::*;
pub use inventory::*;
pub use refresh::*;
