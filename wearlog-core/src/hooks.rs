//! Lifecycle hooks for the presentation layer
//!
//! The manager and the scanner report state changes through these traits so a
//! UI can raise alerts or flip toggles. Every method defaults to a no-op.

use std::sync::{Arc, Mutex};

/// Why `start` did not leave any sensor running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonStartReason {
    /// Battery at or below the floor and not charging
    NotEnoughEnergy,
    /// No enabled sensor could be started
    NoSensorsEnabled,
}

/// Watchdog arm/disarm transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogTransition {
    Armed,
    Disarmed,
}

/// Hooks fired by the sensor manager
pub trait ManagerHooks: Send {
    /// Energy check failed
    fn on_not_enough_energy(&mut self) {}

    /// `start` refused or ended with nothing running
    fn on_non_start(&mut self, _reason: NonStartReason) {}

    /// The last active sensor stopped
    fn on_all_sensors_stopped(&mut self) {}

    /// Watchdog armed or disarmed
    fn on_watchdog_event(&mut self, _transition: WatchdogTransition) {}
}

/// Hooks fired by the backup scanner
pub trait BackupHooks: Send {
    /// A scan ran or the scanner stopped
    fn on_backup_event(&mut self) {}
}

/// Hooks that ignore everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ManagerHooks for NoopHooks {}
impl BackupHooks for NoopHooks {}

/// Hook invocation captured by [`RecordingHooks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    NotEnoughEnergy,
    NonStart(NonStartReason),
    AllSensorsStopped,
    Watchdog(WatchdogTransition),
    Backup,
}

/// Hooks that record every call into a shared log
///
/// Clones share the log; hand one to the manager and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks {
    events: Arc<Mutex<Vec<HookEvent>>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: HookEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }

    /// Snapshot of the recorded calls
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Drain the recorded calls
    pub fn take(&self) -> Vec<HookEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|p| p.into_inner()))
    }

    pub fn count(&self, event: HookEvent) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }
}

impl ManagerHooks for RecordingHooks {
    fn on_not_enough_energy(&mut self) {
        self.push(HookEvent::NotEnoughEnergy);
    }

    fn on_non_start(&mut self, reason: NonStartReason) {
        self.push(HookEvent::NonStart(reason));
    }

    fn on_all_sensors_stopped(&mut self) {
        self.push(HookEvent::AllSensorsStopped);
    }

    fn on_watchdog_event(&mut self, transition: WatchdogTransition) {
        self.push(HookEvent::Watchdog(transition));
    }
}

impl BackupHooks for RecordingHooks {
    fn on_backup_event(&mut self) {
        self.push(HookEvent::Backup);
    }
}
