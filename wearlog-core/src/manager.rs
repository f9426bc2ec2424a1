//! Sensor lifecycle with power-aware admission control
//!
//! ## Overview
//!
//! [`SensorManager`] owns every [`SensorSource`] on the device. It refuses to
//! enable or start sensors while the battery is at or below a floor (unless
//! charging), and supervises running capture with a watchdog that stops
//! everything once the battery drops.
//!
//! ## Context object
//!
//! Everything the manager depends on (clock, battery, hardware backend, UI
//! hooks, configuration) arrives through one [`ManagerContext`] at
//! construction. There is no global manager instance.
//!
//! ## Watchdog
//!
//! ```text
//! start() ── any active? ──→ arm ──(period)──→ tick
//!                                                │
//!                      energy ok ←───────────────┤
//!                        │                       │ energy low
//!                        └── re-arm              └──→ stop() ──→ disarm
//! ```
//!
//! Only one deadline exists at a time (see [`Timer`]). Every arm and disarm
//! fires [`ManagerHooks::on_watchdog_event`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use wearlog_core::device::SimulatedBackend;
//! use wearlog_core::manager::{ManagerConfig, ManagerContext, SensorManager};
//! use wearlog_core::power::SimulatedBattery;
//! use wearlog_core::sensors::SensorKind;
//! use wearlog_core::time::MockTimeSource;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let ctx = ManagerContext::new(
//!     ManagerConfig::new(dir.path()),
//!     Arc::new(MockTimeSource::new(0)),
//!     Box::new(SimulatedBattery::new(50, false)),
//!     Box::new(SimulatedBackend::new()),
//! );
//! let mut manager = SensorManager::new(ctx, Some(&[SensorKind::HeartRate]));
//! assert_eq!(manager.start(&[]), Ok(1));
//! assert!(manager.watchdog().is_armed());
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::device::SensorBackend;
use crate::errors::{ManagerError, SensorError};
use crate::hooks::{ManagerHooks, NonStartReason, NoopHooks, WatchdogTransition};
use crate::power::{EnergyConfig, PowerSource};
use crate::sensors::{SensorDescriptor, SensorKind};
use crate::source::SensorSource;
use crate::store::StoreConfig;
use crate::time::SharedClock;
use crate::timer::Timer;

/// Default watchdog period (10 s)
pub const DEFAULT_WATCHDOG_PERIOD_MS: u64 = 10_000;

/// Per-kind sampling overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingOverride {
    pub frequency_hz: Option<f32>,
    pub batch_size: Option<u32>,
}

/// Manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub store: StoreConfig,
    pub energy: EnergyConfig,
    pub watchdog_period_ms: u64,
    /// Sampling overrides applied when a source is built without explicit values
    pub sensors: BTreeMap<SensorKind, SamplingOverride>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            energy: EnergyConfig::default(),
            watchdog_period_ms: DEFAULT_WATCHDOG_PERIOD_MS,
            sensors: BTreeMap::new(),
        }
    }
}

impl ManagerConfig {
    /// Defaults with log files under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig::new(root),
            ..Self::default()
        }
    }

    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn min_battery_level(mut self, percent: u8) -> Self {
        self.energy.min_battery_level = percent;
        self
    }

    pub fn watchdog_period_ms(mut self, ms: u64) -> Self {
        self.watchdog_period_ms = ms;
        self
    }

    /// Descriptor for `kind`: explicit values, then config overrides, then catalog
    pub fn descriptor(&self, kind: SensorKind, frequency_hz: Option<f32>, batch_size: Option<u32>) -> SensorDescriptor {
        let over = self.sensors.get(&kind).copied().unwrap_or_default();
        SensorDescriptor::with_overrides(
            kind,
            frequency_hz.or(over.frequency_hz),
            batch_size.or(over.batch_size),
        )
    }
}

/// Everything the manager depends on
pub struct ManagerContext {
    pub config: ManagerConfig,
    pub clock: SharedClock,
    pub power: Box<dyn PowerSource>,
    pub backend: Box<dyn SensorBackend>,
    pub hooks: Box<dyn ManagerHooks>,
}

impl ManagerContext {
    /// Context with no-op hooks
    pub fn new(
        config: ManagerConfig,
        clock: SharedClock,
        power: Box<dyn PowerSource>,
        backend: Box<dyn SensorBackend>,
    ) -> Self {
        Self {
            config,
            clock,
            power,
            backend,
            hooks: Box::new(NoopHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: Box<dyn ManagerHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Result of `enable_sensor` when nothing went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    Enabled,
    AlreadyEnabled,
    /// Catalog sensor absent on this device; nothing was added
    Unavailable,
}

/// What one watchdog service step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogTick {
    NotDue,
    Rearmed,
    /// Energy dropped; every sensor was stopped and the watchdog left disarmed
    StoppedLowEnergy,
}

/// Summary of one event-loop turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub batches_written: usize,
    pub watchdog: WatchdogTick,
}

pub struct SensorManager {
    ctx: ManagerContext,
    sources: Vec<SensorSource>,
    watchdog: Timer,
}

impl SensorManager {
    /// Build sources for `kinds`, or for the whole catalog when `None`
    ///
    /// Sensors missing on this device are dropped with a warning.
    pub fn new(ctx: ManagerContext, kinds: Option<&[SensorKind]>) -> Self {
        let watchdog = Timer::new(ctx.config.watchdog_period_ms);
        let mut manager = Self {
            ctx,
            sources: Vec::new(),
            watchdog,
        };

        let kinds = kinds.unwrap_or(&SensorKind::ALL);
        for &kind in kinds {
            if manager.has_sensor(kind) {
                continue;
            }
            manager.add_source(kind, None, None);
        }
        manager
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.ctx.config
    }

    pub fn watchdog(&self) -> &Timer {
        &self.watchdog
    }

    pub fn sources(&self) -> &[SensorSource] {
        &self.sources
    }

    pub fn source(&self, kind: SensorKind) -> Option<&SensorSource> {
        self.sources.iter().find(|s| s.kind() == kind)
    }

    /// Kinds with a source, in insertion order
    pub fn enabled_kinds(&self) -> Vec<SensorKind> {
        self.sources.iter().map(SensorSource::kind).collect()
    }

    pub fn has_sensor(&self, kind: SensorKind) -> bool {
        self.sources.iter().any(|s| s.kind() == kind)
    }

    pub fn any_sensor_active(&self) -> bool {
        self.sources.iter().any(SensorSource::is_active)
    }

    /// Battery at or below the floor and not charging
    ///
    /// Fires `on_not_enough_energy` when true.
    pub fn not_enough_energy(&mut self) -> bool {
        let insufficient = self.ctx.config.energy.is_insufficient(self.ctx.power.as_ref());
        if insufficient {
            self.ctx.hooks.on_not_enough_energy();
        }
        insufficient
    }

    fn energy_error(&self) -> ManagerError {
        ManagerError::NotEnoughEnergy {
            charge: self.ctx.power.charge_level(),
            floor: self.ctx.config.energy.min_battery_level,
        }
    }

    fn add_source(&mut self, kind: SensorKind, frequency_hz: Option<f32>, batch_size: Option<u32>) -> EnableOutcome {
        let descriptor = self.ctx.config.descriptor(kind, frequency_hz, batch_size);
        match SensorSource::new(
            descriptor,
            self.ctx.backend.as_mut(),
            &self.ctx.config.store,
            self.ctx.clock.clone(),
        ) {
            Ok(source) => {
                self.sources.push(source);
                EnableOutcome::Enabled
            }
            Err(e) => {
                warn!("{} not added: {}", kind, e);
                EnableOutcome::Unavailable
            }
        }
    }

    /// Add a source for `kind` unless it already exists or energy is low
    pub fn enable_sensor(
        &mut self,
        kind: SensorKind,
        frequency_hz: Option<f32>,
        batch_size: Option<u32>,
    ) -> Result<EnableOutcome, ManagerError> {
        if self.has_sensor(kind) {
            info!("Sensor {} already enabled", kind);
            return Ok(EnableOutcome::AlreadyEnabled);
        }

        if self.not_enough_energy() {
            warn!(
                "Sensor {} not enabled, battery low: {}",
                kind,
                self.ctx.power.charge_level()
            );
            return Err(self.energy_error());
        }

        Ok(self.add_source(kind, frequency_hz, batch_size))
    }

    /// `enable_sensor` for a settings/UI supplied name
    pub fn enable_sensor_by_name(
        &mut self,
        name: &str,
        frequency_hz: Option<f32>,
        batch_size: Option<u32>,
    ) -> Result<EnableOutcome, ManagerError> {
        let kind = name.parse::<SensorKind>().map_err(|e: SensorError| {
            error!("{}, cannot be enabled", e);
            ManagerError::from(e)
        })?;
        self.enable_sensor(kind, frequency_hz, batch_size)
    }

    /// Stop and evict the source for `kind`; returns whether one existed
    pub fn disable_sensor(&mut self, kind: SensorKind) -> bool {
        if !self.has_sensor(kind) {
            return false;
        }
        self.stop(&[kind]);
        self.sources.retain(|s| s.kind() != kind);
        info!("Sensor {} disabled", kind);
        true
    }

    /// Start sources matching `kinds` (all when empty)
    ///
    /// Returns the number of active sources. Arms the watchdog when at least
    /// one is active.
    pub fn start(&mut self, kinds: &[SensorKind]) -> Result<usize, ManagerError> {
        if self.not_enough_energy() {
            warn!(
                "Sensor capture not started, battery low: {}",
                self.ctx.power.charge_level()
            );
            self.ctx.hooks.on_non_start(NonStartReason::NotEnoughEnergy);
            return Err(self.energy_error());
        }

        for source in self.sources.iter_mut() {
            if kinds.is_empty() || kinds.contains(&source.kind()) {
                if let Err(e) = source.start() {
                    warn!("{} failed to start: {}", source.kind(), e);
                }
            }
        }

        let active = self.sources.iter().filter(|s| s.is_active()).count();
        if active > 0 {
            self.start_watchdog();
            Ok(active)
        } else {
            info!("No sensors enabled");
            self.ctx.hooks.on_non_start(NonStartReason::NoSensorsEnabled);
            Err(ManagerError::NoSensorsEnabled)
        }
    }

    /// Stop sources matching `kinds` (all when empty)
    ///
    /// When nothing remains active the watchdog is disarmed and
    /// `on_all_sensors_stopped` fires. Returns the number still active.
    pub fn stop(&mut self, kinds: &[SensorKind]) -> usize {
        for source in self.sources.iter_mut() {
            if kinds.is_empty() || kinds.contains(&source.kind()) {
                if let Err(e) = source.stop() {
                    warn!("{} failed to stop: {}", source.kind(), e);
                }
            }
        }

        let active = self.sources.iter().filter(|s| s.is_active()).count();
        if active == 0 {
            self.stop_watchdog();
            self.ctx.hooks.on_all_sensors_stopped();
        }
        active
    }

    /// Arm (or re-arm) the watchdog one period from now
    pub fn start_watchdog(&mut self) {
        let now = self.ctx.clock.now();
        self.watchdog.arm(now);
        info!("Watchdog started");
        self.ctx.hooks.on_watchdog_event(WatchdogTransition::Armed);
    }

    pub fn stop_watchdog(&mut self) {
        if self.watchdog.disarm() {
            info!("Watchdog stopped");
        }
        self.ctx.hooks.on_watchdog_event(WatchdogTransition::Disarmed);
    }

    /// Run the watchdog if its deadline has passed
    pub fn service_watchdog(&mut self) -> WatchdogTick {
        let now = self.ctx.clock.now();
        if !self.watchdog.fire_if_due(now) {
            return WatchdogTick::NotDue;
        }

        let insufficient = self.not_enough_energy();
        info!("Watchdog, enough battery? {}", !insufficient);
        if insufficient {
            self.stop(&[]);
            WatchdogTick::StoppedLowEnergy
        } else {
            self.start_watchdog();
            WatchdogTick::Rearmed
        }
    }

    /// One cooperative turn: drain ready batches, then service the watchdog
    pub fn poll(&mut self) -> PollReport {
        let mut batches_written = 0;
        for source in self.sources.iter_mut().filter(|s| s.is_active()) {
            batches_written += source.pump();
        }
        if batches_written > 0 {
            debug!("{} batches written", batches_written);
        }

        PollReport {
            batches_written,
            watchdog: self.service_watchdog(),
        }
    }
}
