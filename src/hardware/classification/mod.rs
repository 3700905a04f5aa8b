//! Hardware Classification Module
//!
//! Classifies block devices by their role in the storage hierarchy and
//! aggregates device names into hierarchy buckets.

pub mod classifier;
pub mod hierarchy;

pub use classifier::*;
pub use hierarchy::*;
