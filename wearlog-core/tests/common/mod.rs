//! Common fixtures for integration tests
//!
//! - [`Rig`]: temp storage root, shared mock clock, simulated battery,
//!   backend and transfer link, plus recording hooks
//! - batch generators and log file readers

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use wearlog_core::format::ReadingBatch;
use wearlog_core::hooks::RecordingHooks;
use wearlog_core::manager::{ManagerConfig, ManagerContext, SensorManager};
use wearlog_core::sensors::SensorKind;
use wearlog_core::store::{is_log_file, list_files, StoreConfig};
use wearlog_core::time::{MockTimeSource, NameClock, Timestamp};
use wearlog_core::{LocalLink, SimulatedBackend, SimulatedBattery};

/// 2024-01-01T12:00:00Z
pub const NOON: Timestamp = 1_704_110_400_000;

pub struct Rig {
    pub dir: TempDir,
    pub clock: MockTimeSource,
    pub battery: SimulatedBattery,
    pub backend: SimulatedBackend,
    pub hooks: RecordingHooks,
    pub link: LocalLink,
}

impl Rig {
    pub fn new(battery_level: u8) -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
            clock: MockTimeSource::new(NOON),
            battery: SimulatedBattery::new(battery_level, false),
            backend: SimulatedBackend::new(),
            hooks: RecordingHooks::new(),
            link: LocalLink::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Store config with UTC file names, so names are host independent
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.root()).name_clock(NameClock::Utc)
    }

    pub fn manager(&self, kinds: Option<&[SensorKind]>) -> SensorManager {
        let ctx = ManagerContext::new(
            ManagerConfig::default().store(self.store_config()),
            Arc::new(self.clock.clone()),
            Box::new(self.battery.clone()),
            Box::new(self.backend.clone()),
        )
        .with_hooks(Box::new(self.hooks.clone()));
        SensorManager::new(ctx, kinds)
    }

    /// Pending log files, sorted
    pub fn log_files(&self) -> Vec<String> {
        list_files(self.root(), is_log_file).expect("list log files")
    }

    pub fn all_files(&self) -> Vec<String> {
        list_files(self.root(), |_| true).expect("list files")
    }

    pub fn touch(&self, name: &str, contents: &str) {
        fs::write(self.root().join(name), contents).expect("write fixture file");
    }
}

/// `count` heart-rate samples `step_ms` apart, starting at relative time zero
pub fn heartrate_batch(count: usize, step_ms: u64) -> ReadingBatch {
    let mut batch = ReadingBatch::new();
    for i in 0..count {
        batch.push(i as u64 * step_ms, &[60.0 + (i % 20) as f32]);
    }
    batch
}

/// Record lines of a log file, header excluded
pub fn records(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("read log file")
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

pub fn record_timestamp(line: &str) -> Timestamp {
    line.split(';')
        .next()
        .and_then(|t| t.parse().ok())
        .expect("record timestamp")
}
