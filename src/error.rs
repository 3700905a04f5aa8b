//! Error types for the Node Disk Manager
//!
//! Provides structured error types for sysfs discovery, the event watcher,
//! claim selection and the inventory store.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the daemon
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Hardware Discovery Errors
    // =========================================================================
    #[error("Hardware discovery failed: {0}")]
    HardwareDiscovery(String),

    #[error("Sysfs lookup failed for {device}: {reason}")]
    Sysfs { device: String, reason: String },

    // =========================================================================
    // Event Watcher Errors
    // =========================================================================
    #[error("Invalid event type mask: {bits:#x}")]
    InvalidEventType { bits: u32 },

    #[error("Unknown event type: {name}")]
    UnknownEventType { name: String },

    #[error("File already watched: {}", file.display())]
    FileAlreadyWatched { file: PathBuf },

    #[error("Watcher not found: {}", file.display())]
    WatcherNotFound { file: PathBuf },

    #[error("Event watcher is already running")]
    WatcherActive,

    #[error("Event watcher has been closed")]
    WatcherClosed,

    #[error("System call failed: {0}")]
    Nix(#[from] nix::Error),

    // =========================================================================
    // Claim Selection Errors
    // =========================================================================
    #[error("No block devices available for selection")]
    EmptyInventory,

    #[error("No devices found matching criteria")]
    NoMatchingDevices,

    #[error("No device with matching resource requirements: requested {requested} bytes")]
    NoDeviceWithResources { requested: u64 },

    #[error("Block device {device} is already claimed")]
    DeviceAlreadyClaimed { device: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::Io(_) | Error::Nix(_) => ErrorAction::RequeueWithBackoff,

            // Structural mismatch - wait for the inventory to change
            Error::EmptyInventory | Error::NoMatchingDevices => {
                ErrorAction::RequeueAfter(Duration::from_secs(30))
            }

            // Capacity mismatch - devices rarely grow, retry slowly
            Error::NoDeviceWithResources { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(300))
            }

            Error::DeviceAlreadyClaimed { .. } => ErrorAction::RequeueWithBackoff,

            // Caller/configuration errors - don't retry automatically
            Error::Configuration(_)
            | Error::CapacityParse(_)
            | Error::Yaml(_)
            | Error::InvalidEventType { .. }
            | Error::UnknownEventType { .. }
            | Error::FileAlreadyWatched { .. }
            | Error::WatcherNotFound { .. }
            | Error::WatcherActive
            | Error::WatcherClosed => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Io(_) | Error::Nix(_) | Error::DeviceAlreadyClaimed { .. }
        )
    }
}

/// Result type alias for the daemon
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        assert_eq!(
            Error::NoMatchingDevices.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(30))
        );

        let err = Error::NoDeviceWithResources { requested: 1024 };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(300))
        );

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);
    }

    #[test]
    fn test_selection_failures_are_distinguishable() {
        let structural = Error::NoMatchingDevices;
        let capacity = Error::NoDeviceWithResources { requested: 10 };

        assert_ne!(structural.action(), capacity.action());
        assert_ne!(structural.to_string(), capacity.to_string());
        assert_eq!(structural.to_string(), "No devices found matching criteria");
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::Io(std::io::Error::other("boom"));
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let watcher_err = Error::FileAlreadyWatched {
            file: PathBuf::from("/proc/1/mounts"),
        };
        assert!(!watcher_err.is_retryable());
        assert!(!watcher_err.is_transient());
    }
}
