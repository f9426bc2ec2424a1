//! Error types for the capture pipeline
//!
//! Errors are grouped by the taxonomy the pipeline reacts to:
//!
//! - **Configuration**: unknown sensor type, unreadable settings or config
//! - **Resource exhaustion**: storage quota exceeded, battery too low
//! - **Hardware absence**: a sensor kind the device does not have
//! - **I/O failure**: log file creation or write failure
//! - **Transport failure**: the outbox refused or lost a file
//!
//! None of them is fatal to the host. Callers log and skip; a broken sensor or
//! logger never takes the rest of the pipeline down with it.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or driving a sensor
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// The name does not match any catalog entry
    #[error("\"{0}\" sensor is not implemented")]
    NotImplemented(String),

    /// The catalog knows the sensor but this device does not have it
    #[error("this device doesn't have a {0} sensor")]
    Unavailable(&'static str),

    /// The hardware reported a failure while starting, stopping or reading
    #[error("{sensor} sensor fault: {reason}")]
    Device {
        sensor: &'static str,
        reason: String,
    },
}

/// Errors raised by the log store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not create its log file and refuses further writes
    #[error("log store {0} is disabled")]
    Disabled(String),

    /// Writing would push the storage root over its hard quota
    #[error("cannot write {requested} bytes of data, {used} of {quota} bytes used")]
    QuotaExceeded {
        requested: u64,
        used: u64,
        quota: u64,
    },

    /// Filesystem error on a specific path
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by the device/companion file transfer link
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The outbox refused to queue a file
    #[error("failed to queue file transfer of {name}: {reason}")]
    Enqueue { name: String, reason: String },

    /// A transfer state change that the state machine does not allow
    #[error("illegal transfer transition for {name}: {from:?} -> {to:?}")]
    IllegalTransition {
        name: String,
        from: crate::transfer::TransferState,
        to: crate::transfer::TransferState,
    },

    /// The link has been closed by the other side
    #[error("transfer link closed")]
    Closed,
}

/// Errors returned by sensor manager operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManagerError {
    /// Battery at or below the floor and not charging
    #[error("battery low: {charge}% (floor {floor}%)")]
    NotEnoughEnergy { charge: u8, floor: u8 },

    /// `start` ended with no active sensor
    #[error("no sensors enabled")]
    NoSensorsEnabled,

    #[error(transparent)]
    Sensor(#[from] SensorError),
}

/// Errors raised while loading or saving settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed settings: {0}")]
    Format(#[from] serde_json::Error),

    /// A key carried a value of the wrong shape
    #[error("invalid value for setting {key}: {reason}")]
    InvalidValue { key: String, reason: &'static str },
}

/// Errors raised while loading the pipeline configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Result alias for log store operations
pub type StoreResult<T> = Result<T, StoreError>;
