//! Sensor catalog
//!
//! The catalog is the single source of truth for which sensor kinds exist and
//! how they sample by default. Adding a kind means extending [`SensorKind`];
//! there is no string-keyed builder lookup.
//!
//! | Kind          | Tag    | Default rate | Default batch | Fields  |
//! |---------------|--------|--------------|---------------|---------|
//! | accelerometer | `ACCL` | 5 Hz         | 150           | x, y, z |
//! | gyroscope     | `GYRO` | 5 Hz         | 150           | x, y, z |
//! | heartrate     | `HRTR` | 1 Hz         | 30            | bpm     |

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SensorError;

/// Sensor kinds known to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    HeartRate,
}

impl SensorKind {
    /// Every catalog entry, in catalog order
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Accelerometer,
        SensorKind::Gyroscope,
        SensorKind::HeartRate,
    ];

    /// Lowercase name, also used as the log file prefix
    pub const fn name(&self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Gyroscope => "gyroscope",
            SensorKind::HeartRate => "heartrate",
        }
    }

    /// Fixed 4-character record tag
    pub const fn tag(&self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "ACCL",
            SensorKind::Gyroscope => "GYRO",
            SensorKind::HeartRate => "HRTR",
        }
    }

    /// Number of value fields per sample
    pub const fn fields(&self) -> usize {
        match self {
            SensorKind::Accelerometer | SensorKind::Gyroscope => 3,
            SensorKind::HeartRate => 1,
        }
    }

    /// Settings key toggling this sensor (`logheartrate`, ...)
    pub fn settings_key(&self) -> String {
        format!("log{}", self.name())
    }

    /// Default sampling parameters
    pub const fn descriptor(&self) -> SensorDescriptor {
        match self {
            SensorKind::Accelerometer | SensorKind::Gyroscope => SensorDescriptor {
                kind: *self,
                frequency_hz: 5.0,
                batch_size: 150,
            },
            SensorKind::HeartRate => SensorDescriptor {
                kind: *self,
                frequency_hz: 1.0,
                batch_size: 30,
            },
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SensorKind {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        SensorKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or(SensorError::NotImplemented(normalized))
    }
}

/// Sampling parameters of one sensor source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub kind: SensorKind,
    /// Samples per second
    pub frequency_hz: f32,
    /// Samples delivered per reading event
    pub batch_size: u32,
}

impl SensorDescriptor {
    /// Catalog defaults with optional overrides
    ///
    /// Zero or non-finite overrides fall back to the default, like an unset
    /// value would.
    pub fn with_overrides(kind: SensorKind, frequency_hz: Option<f32>, batch_size: Option<u32>) -> Self {
        let defaults = kind.descriptor();
        Self {
            kind,
            frequency_hz: frequency_hz
                .filter(|f| f.is_finite() && *f > 0.0)
                .unwrap_or(defaults.frequency_hz),
            batch_size: batch_size.filter(|b| *b > 0).unwrap_or(defaults.batch_size),
        }
    }

    /// Nominal time a full batch takes to accumulate, in milliseconds
    pub fn batch_span_ms(&self) -> u64 {
        (1000.0 * self.batch_size as f64 / self.frequency_hz as f64).round() as u64
    }
}
