//! Allocation Module
//!
//! Selects the block device a claim binds to through an ordered pipeline
//! of filters.

pub mod engine;
pub mod filters;
pub mod selector;

pub use engine::*;
pub use filters::*;
pub use selector::*;
