//! Error types for overkill

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, OverkillError>;

/// Main error type for overkill
#[derive(Error, Debug)]
pub enum OverkillError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("DBus error: {0}")]
    DBus(#[from] zbus::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid {field}: {value} (allowed {min}..={max})")]
    InvalidRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Profile not found: {name}")]
    ProfileNotFound { name: String },

    #[error("Invalid fan curve: {0}")]
    InvalidFanCurve(String),

    #[error("Failed to back up {}: {source}", path.display())]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Another process holds the lock on {}", path.display())]
    Locked { path: PathBuf },

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Fan driver error at {}: {reason}", path.display())]
    DriverError { path: PathBuf, reason: String },

    #[error("Command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },
}

impl OverkillError {
    /// Build a driver error from any displayable cause
    pub fn driver(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        OverkillError::DriverError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
