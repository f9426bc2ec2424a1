//! Device-side capture pipeline for WearLog
//!
//! Samples wearable sensors in batches, appends them to rotating CSV log files
//! under a storage quota, and hands completed files to a companion for upload.
//! Capture is refused or stopped when the battery runs low.
//!
//! Key constraints:
//! - Single-threaded cooperative loop, no locks in the device path
//! - One append per sensor batch, no file handle kept open between appends
//! - Delivery acknowledged by renaming files, never by deleting them
//!
//! ```no_run
//! use std::sync::Arc;
//! use wearlog_core::{DevicePipeline, LocalLink, PipelineConfig, SimulatedBackend, SimulatedBattery, SystemTime};
//!
//! let mut pipeline = DevicePipeline::builder(
//!     PipelineConfig::new("/data/wearlog"),
//!     Arc::new(SystemTime),
//!     Box::new(SimulatedBattery::default()),
//!     Box::new(SimulatedBackend::new()),
//!     Box::new(LocalLink::new()),
//! )
//! .build();
//!
//! pipeline.start().ok();
//! loop {
//!     pipeline.turn();
//! }
//! ```

#![deny(unsafe_code)]

pub mod backup;
pub mod config;
pub mod device;
pub mod errors;
pub mod format;
pub mod hooks;
pub mod manager;
pub mod pipeline;
pub mod power;
pub mod sensors;
pub mod settings;
pub mod source;
pub mod store;
pub mod time;
pub mod timer;
pub mod transfer;

// Public API
pub use backup::BackupScanner;
pub use config::{PipelineConfig, SensorOverride};
pub use device::{SensorBackend, SensorDevice, SimulatedBackend};
pub use errors::{ConfigError, ManagerError, SensorError, SettingsError, StoreError, StoreResult, TransferError};
pub use hooks::{BackupHooks, ManagerHooks, NonStartReason, WatchdogTransition};
pub use manager::{EnableOutcome, ManagerConfig, ManagerContext, SensorManager};
pub use pipeline::DevicePipeline;
pub use power::{EnergyConfig, PowerSource, SimulatedBattery};
pub use sensors::{SensorDescriptor, SensorKind};
pub use settings::Settings;
pub use store::{LogStore, StoreConfig};
pub use time::{MockTimeSource, SharedClock, SystemTime, TimeSource, Timestamp};
pub use transfer::{
    DeliveryState, Enqueued, Inbox, InboundFile, LocalLink, Outbox, TransferEvent, TransferState,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
