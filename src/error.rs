//! Error types for smartsentry

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while monitoring disks
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// smartctl did not answer within the deadline
    #[error("SMART read timed out for {device} after {elapsed:?}")]
    ReadTimeout { device: String, elapsed: Duration },

    /// smartctl produced no JSON, invalid JSON, or inconsistent fields
    #[error("SMART response unusable for {device}: {reason}")]
    ReadParse { device: String, reason: String },

    /// Device reported no SMART capability (USB bridge, card reader, ...)
    #[error("SMART not supported on {device}")]
    ReadNoSupport { device: String },

    /// Device node disappeared between enumeration and read
    #[error("Device vanished: {device}")]
    DeviceVanished { device: String },

    /// Configuration file present but unusable
    #[error("Configuration invalid at {path}: {reason}")]
    ConfigInvalid { path: String, reason: String },

    /// One of the unmount safety gates refused the attempt
    #[error("Unmount refused for {device} at gate {gate}: {reason}")]
    UnmountRefused {
        device: String,
        gate: u8,
        reason: String,
    },

    /// External umount returned non-zero or timed out
    #[error("Unmount failed for {mountpoint}: {reason}")]
    UnmountFailed { mountpoint: String, reason: String },

    /// smartctl binary not found on PATH
    #[error("smartctl not available: {0}")]
    SmartctlMissing(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a per-device read failure that feeds the GDC
    /// state machine rather than the caller.
    pub fn is_read_failure(&self) -> bool {
        matches!(
            self,
            Error::ReadTimeout { .. }
                | Error::ReadParse { .. }
                | Error::ReadNoSupport { .. }
                | Error::DeviceVanished { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_failures_classified() {
        let timeout = Error::ReadTimeout {
            device: "sda".into(),
            elapsed: Duration::from_secs(15),
        };
        assert!(timeout.is_read_failure());

        let config = Error::ConfigInvalid {
            path: "/etc/smartsentry/settings.json".into(),
            reason: "not json".into(),
        };
        assert!(!config.is_read_failure());
    }

    #[test]
    fn test_display_includes_device() {
        let err = Error::ReadNoSupport {
            device: "sdb".into(),
        };
        assert!(err.to_string().contains("sdb"));
    }
}
