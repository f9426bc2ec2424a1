//! Device event loop
//!
//! ## Overview
//!
//! [`DevicePipeline`] wires the device-side components together and advances
//! them one cooperative turn at a time:
//!
//! ```text
//! settings ──toggle──→ SensorManager ──batches──→ LogStore files
//!                           │                         │
//!                  all sensors stopped          BackupScanner ──→ Outbox
//!                           │                         ↑             │
//!                           └──── purge .backd ───────┘ ←─ events ──┘
//! ```
//!
//! Each [`DevicePipeline::turn`] drains sensor batches and services the
//! watchdog, purges acknowledged files if the last sensor stopped since the
//! previous turn, runs a due backup scan and applies waiting delivery events.
//! Nothing inside a turn blocks, and no two components run at the same time.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use wearlog_core::config::PipelineConfig;
//! use wearlog_core::device::SimulatedBackend;
//! use wearlog_core::pipeline::DevicePipeline;
//! use wearlog_core::power::SimulatedBattery;
//! use wearlog_core::time::MockTimeSource;
//! use wearlog_core::transfer::LocalLink;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut pipeline = DevicePipeline::builder(
//!     PipelineConfig::new(dir.path()),
//!     Arc::new(MockTimeSource::new(0)),
//!     Box::new(SimulatedBattery::default()),
//!     Box::new(SimulatedBackend::new()),
//!     Box::new(LocalLink::new()),
//! )
//! .build();
//!
//! pipeline.apply_setting("logheartrate", serde_json::json!(true)).unwrap();
//! assert_eq!(pipeline.start(), Ok(1));
//! pipeline.turn();
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde_json::Value;

use crate::backup::BackupScanner;
use crate::config::PipelineConfig;
use crate::device::SensorBackend;
use crate::errors::{ManagerError, SettingsError};
use crate::hooks::{BackupHooks, ManagerHooks, NoopHooks, NonStartReason, WatchdogTransition};
use crate::manager::{ManagerContext, SensorManager, WatchdogTick};
use crate::power::PowerSource;
use crate::settings::{SettingChange, Settings};
use crate::time::SharedClock;
use crate::transfer::Outbox;

/// Counters accumulated across turns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineMetrics {
    pub turns: u64,
    pub batches_written: u64,
    pub files_enqueued: u64,
    pub files_acknowledged: u64,
    pub files_deleted: u64,
    pub low_energy_stops: u64,
}

/// What one turn did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnReport {
    pub batches_written: usize,
    pub watchdog: WatchdogTick,
    /// Files enqueued by a backup scan, `None` when no scan was due
    pub files_enqueued: Option<usize>,
    pub files_acknowledged: usize,
    pub files_deleted: usize,
}

/// Forwards manager hooks and remembers that every sensor stopped
struct StopSignal {
    inner: Box<dyn ManagerHooks>,
    stopped: Arc<AtomicBool>,
}

impl ManagerHooks for StopSignal {
    fn on_not_enough_energy(&mut self) {
        self.inner.on_not_enough_energy();
    }

    fn on_non_start(&mut self, reason: NonStartReason) {
        self.inner.on_non_start(reason);
    }

    fn on_all_sensors_stopped(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.inner.on_all_sensors_stopped();
    }

    fn on_watchdog_event(&mut self, transition: WatchdogTransition) {
        self.inner.on_watchdog_event(transition);
    }
}

pub struct PipelineBuilder {
    config: PipelineConfig,
    clock: SharedClock,
    power: Box<dyn PowerSource>,
    backend: Box<dyn SensorBackend>,
    outbox: Box<dyn Outbox>,
    manager_hooks: Box<dyn ManagerHooks>,
    backup_hooks: Box<dyn BackupHooks>,
    settings: Settings,
}

impl PipelineBuilder {
    pub fn manager_hooks(mut self, hooks: Box<dyn ManagerHooks>) -> Self {
        self.manager_hooks = hooks;
        self
    }

    pub fn backup_hooks(mut self, hooks: Box<dyn BackupHooks>) -> Self {
        self.backup_hooks = hooks;
        self
    }

    /// Initial settings; sensors whose toggle is on are enabled at build time
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> DevicePipeline {
        let stopped = Arc::new(AtomicBool::new(false));
        let hooks = StopSignal {
            inner: self.manager_hooks,
            stopped: Arc::clone(&stopped),
        };
        let ctx = ManagerContext::new(
            self.config.manager_config(),
            self.clock.clone(),
            self.power,
            self.backend,
        )
        .with_hooks(Box::new(hooks));

        let kinds = self.settings.enabled_sensors();
        let manager = SensorManager::new(ctx, Some(kinds.as_slice()));
        let scanner = BackupScanner::new(
            self.config.store.root.clone(),
            self.config.backup_period_ms,
            self.outbox,
        )
        .with_hooks(self.backup_hooks);

        DevicePipeline {
            manager,
            scanner,
            settings: self.settings,
            clock: self.clock,
            stopped,
            metrics: PipelineMetrics::default(),
        }
    }
}

pub struct DevicePipeline {
    manager: SensorManager,
    scanner: BackupScanner,
    settings: Settings,
    clock: SharedClock,
    stopped: Arc<AtomicBool>,
    metrics: PipelineMetrics,
}

impl DevicePipeline {
    pub fn builder(
        config: PipelineConfig,
        clock: SharedClock,
        power: Box<dyn PowerSource>,
        backend: Box<dyn SensorBackend>,
        outbox: Box<dyn Outbox>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            config,
            clock,
            power,
            backend,
            outbox,
            manager_hooks: Box::new(NoopHooks),
            backup_hooks: Box::new(NoopHooks),
            settings: Settings::default(),
        }
    }

    pub fn manager(&self) -> &SensorManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut SensorManager {
        &mut self.manager
    }

    pub fn scanner(&self) -> &BackupScanner {
        &self.scanner
    }

    pub fn scanner_mut(&mut self) -> &mut BackupScanner {
        &mut self.scanner
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Start capture and the periodic backup scan
    ///
    /// The scan runs even when no sensor could start, so files left from an
    /// earlier session still reach the companion.
    pub fn start(&mut self) -> Result<usize, ManagerError> {
        self.stopped.store(false, Ordering::SeqCst);
        self.scanner.start(self.clock.now());
        self.manager.start(&[])
    }

    /// Stop capture and the backup scan, purging acknowledged files
    pub fn stop(&mut self) {
        self.manager.stop(&[]);
        self.stopped.store(false, Ordering::SeqCst);
        self.metrics.files_deleted += self.scanner.stop() as u64;
    }

    /// Apply one key from the settings channel
    ///
    /// Sensor toggles enable or disable the matching sensor. A refused enable
    /// is logged; the stored toggle keeps the requested value.
    pub fn apply_setting(&mut self, key: &str, value: Value) -> Result<Option<SettingChange>, SettingsError> {
        let change = self.settings.apply(key, value)?;
        if let Some(SettingChange::SensorToggle { kind, enabled }) = &change {
            if *enabled {
                if let Err(e) = self.manager.enable_sensor(*kind, None, None) {
                    warn!("{} not enabled: {}", kind, e);
                }
            } else {
                self.manager.disable_sensor(*kind);
            }
        }
        Ok(change)
    }

    pub fn save_settings(&self, path: &Path) -> Result<(), SettingsError> {
        self.settings.save(path)
    }

    /// Advance every component by one cooperative step
    pub fn turn(&mut self) -> TurnReport {
        let poll = self.manager.poll();
        if poll.watchdog == WatchdogTick::StoppedLowEnergy {
            self.metrics.low_energy_stops += 1;
        }

        let mut files_deleted = 0;
        if self.stopped.swap(false, Ordering::SeqCst) {
            info!("All sensors stopped, purging transferred files");
            files_deleted = self.scanner.delete_backed_up_files();
        }

        let files_enqueued = self.scanner.poll(self.clock.now()).map(|names| names.len());
        let files_acknowledged = self.scanner.drain_transfer_events();

        self.metrics.turns += 1;
        self.metrics.batches_written += poll.batches_written as u64;
        self.metrics.files_enqueued += files_enqueued.unwrap_or(0) as u64;
        self.metrics.files_acknowledged += files_acknowledged as u64;
        self.metrics.files_deleted += files_deleted as u64;

        TurnReport {
            batches_written: poll.batches_written,
            watchdog: poll.watchdog,
            files_enqueued,
            files_acknowledged,
            files_deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedBackend;
    use crate::power::SimulatedBattery;
    use crate::sensors::SensorKind;
    use crate::time::MockTimeSource;
    use crate::transfer::LocalLink;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir, battery: &SimulatedBattery, clock: &MockTimeSource) -> DevicePipeline {
        DevicePipeline::builder(
            PipelineConfig::new(dir.path()),
            Arc::new(clock.clone()),
            Box::new(battery.clone()),
            Box::new(SimulatedBackend::new()),
            Box::new(LocalLink::new()),
        )
        .build()
    }

    #[test]
    fn toggles_drive_the_manager() {
        let dir = TempDir::new().unwrap();
        let mut p = pipeline(&dir, &SimulatedBattery::default(), &MockTimeSource::new(0));
        assert!(p.manager().sources().is_empty());

        p.apply_setting("loggyroscope", json!(true)).unwrap();
        assert!(p.manager().has_sensor(SensorKind::Gyroscope));

        p.apply_setting("loggyroscope", json!(false)).unwrap();
        assert!(!p.manager().has_sensor(SensorKind::Gyroscope));
    }

    #[test]
    fn settings_seed_initial_sensors() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.apply("logheartrate", json!(true)).unwrap();

        let p = DevicePipeline::builder(
            PipelineConfig::new(dir.path()),
            Arc::new(MockTimeSource::new(0)),
            Box::new(SimulatedBattery::default()),
            Box::new(SimulatedBackend::new()),
            Box::new(LocalLink::new()),
        )
        .settings(settings)
        .build();
        assert_eq!(p.manager().enabled_kinds(), vec![SensorKind::HeartRate]);
    }

    #[test]
    fn low_energy_stop_purges_acknowledged_files() {
        let dir = TempDir::new().unwrap();
        let battery = SimulatedBattery::new(60, false);
        let clock = MockTimeSource::new(1_704_110_400_000);
        let mut p = pipeline(&dir, &battery, &clock);

        p.apply_setting("logheartrate", json!(true)).unwrap();
        p.start().unwrap();
        let backd = dir.path().join("heartrate_20230101-000000.log.csv.backd");
        fs::write(&backd, "x").unwrap();

        battery.set_level(5);
        clock.advance(10_000);
        let report = p.turn();
        assert_eq!(report.watchdog, WatchdogTick::StoppedLowEnergy);
        assert_eq!(report.files_deleted, 1);
        assert!(!backd.exists());
        assert_eq!(p.metrics().low_energy_stops, 1);

        // the purge happens once per stop
        assert_eq!(p.turn().files_deleted, 0);
    }

    #[test]
    fn scan_runs_on_its_own_period() {
        let dir = TempDir::new().unwrap();
        let clock = MockTimeSource::new(0);
        let mut p = pipeline(&dir, &SimulatedBattery::default(), &clock);
        fs::write(dir.path().join("gyroscope_20240101-000000.log.csv"), "a").unwrap();
        fs::write(dir.path().join("gyroscope_20240101-000100.log.csv"), "b").unwrap();

        assert_eq!(p.start(), Err(ManagerError::NoSensorsEnabled));
        assert_eq!(p.turn().files_enqueued, None);
        clock.advance(60_000);
        assert_eq!(p.turn().files_enqueued, Some(1));
        assert_eq!(p.metrics().turns, 2);
    }
}
