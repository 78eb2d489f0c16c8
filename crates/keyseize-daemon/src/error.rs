//! Error types for device capture

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a device handle
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device node could not be opened
    #[error("Failed to open device at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Exclusive access was refused (another client holds the grab)
    #[error("Failed to seize device {id}: {source}")]
    SeizeFailed {
        id: u64,
        #[source]
        source: std::io::Error,
    },

    /// The device does not belong to any configured device class
    #[error("Device at {path} does not match any configured device class")]
    NotMatched { path: PathBuf },
}

/// Errors raised while setting up the capture context
#[derive(Debug, Error)]
pub enum GrabberError {
    /// The platform device-notification subsystem could not be started
    #[error("Device notification subsystem unavailable: {0}")]
    NotificationUnavailable(#[source] std::io::Error),

    /// The serialization context has shut down
    #[error("Device grabber is no longer running")]
    ContextClosed,
}
