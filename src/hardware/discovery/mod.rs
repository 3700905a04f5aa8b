//! Hardware Discovery Module
//!
//! Discovers block devices on Linux nodes through sysfs, sparse files, the
//! mount table and on-disk signatures.

pub mod device;
pub mod mounts;
pub mod scanner;
pub mod signature;
pub mod sparse;
pub mod sysfs;

pub use device::*;
pub use mounts::*;
pub use scanner::*;
pub use signature::*;
pub use sparse::*;
pub use sysfs::*;
