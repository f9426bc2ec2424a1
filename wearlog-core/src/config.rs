//! Device pipeline configuration
//!
//! Every field has a default, so an empty JSON object is a valid config:
//!
//! ```json
//! {
//!   "store": { "root": "/data/logs", "file_size_limit": 512000 },
//!   "energy": { "min_battery_level": 20 },
//!   "watchdog_period_ms": 10000,
//!   "backup_period_ms": 60000,
//!   "sensors": [ { "kind": "heartrate", "frequency_hz": 1.0, "batch_size": 30 } ]
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backup::DEFAULT_BACKUP_PERIOD_MS;
use crate::errors::ConfigError;
use crate::manager::{ManagerConfig, SamplingOverride, DEFAULT_WATCHDOG_PERIOD_MS};
use crate::power::EnergyConfig;
use crate::sensors::SensorKind;
use crate::store::StoreConfig;

/// Sampling parameters for one sensor kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorOverride {
    pub kind: SensorKind,
    #[serde(default)]
    pub frequency_hz: Option<f32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub energy: EnergyConfig,
    pub watchdog_period_ms: u64,
    pub backup_period_ms: u64,
    pub sensors: Vec<SensorOverride>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            energy: EnergyConfig::default(),
            watchdog_period_ms: DEFAULT_WATCHDOG_PERIOD_MS,
            backup_period_ms: DEFAULT_BACKUP_PERIOD_MS,
            sensors: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Defaults with log files under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig::new(root),
            ..Self::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watchdog_period_ms == 0 {
            return Err(ConfigError::Invalid("watchdog_period_ms must be positive"));
        }
        if self.backup_period_ms == 0 {
            return Err(ConfigError::Invalid("backup_period_ms must be positive"));
        }
        if self.store.file_size_limit == 0 {
            return Err(ConfigError::Invalid("store.file_size_limit must be positive"));
        }
        if self.energy.min_battery_level > 100 {
            return Err(ConfigError::Invalid("energy.min_battery_level is a percentage"));
        }
        Ok(())
    }

    /// The part of the config the sensor manager consumes
    pub fn manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig {
            store: self.store.clone(),
            energy: self.energy,
            watchdog_period_ms: self.watchdog_period_ms,
            ..ManagerConfig::default()
        };
        for o in &self.sensors {
            config.sensors.insert(
                o.kind,
                SamplingOverride {
                    frequency_hz: o.frequency_hz,
                    batch_size: o.batch_size,
                },
            );
        }
        config
    }
}
