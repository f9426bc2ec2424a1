//! Battery state and admission control

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Read-only view of the device battery
pub trait PowerSource: Send + Sync {
    /// Charge level in percent (0-100)
    fn charge_level(&self) -> u8;

    /// Whether the device is plugged in
    fn is_charging(&self) -> bool;
}

/// Battery whose state is set by hand
///
/// Clones share state, so a test or simulator keeps one handle to drive the
/// level the manager sees.
#[derive(Debug, Clone)]
pub struct SimulatedBattery {
    level: Arc<AtomicU8>,
    charging: Arc<AtomicBool>,
}

impl SimulatedBattery {
    pub fn new(level: u8, charging: bool) -> Self {
        Self {
            level: Arc::new(AtomicU8::new(level.min(100))),
            charging: Arc::new(AtomicBool::new(charging)),
        }
    }

    pub fn set_level(&self, level: u8) {
        self.level.store(level.min(100), Ordering::SeqCst);
    }

    pub fn set_charging(&self, charging: bool) {
        self.charging.store(charging, Ordering::SeqCst);
    }
}

impl Default for SimulatedBattery {
    fn default() -> Self {
        Self::new(100, false)
    }
}

impl PowerSource for SimulatedBattery {
    fn charge_level(&self) -> u8 {
        self.level.load(Ordering::SeqCst)
    }

    fn is_charging(&self) -> bool {
        self.charging.load(Ordering::SeqCst)
    }
}

/// Battery floor below which capture is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// Minimum charge in percent; at or below it capture stops unless charging
    pub min_battery_level: u8,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self { min_battery_level: 20 }
    }
}

impl EnergyConfig {
    /// True when charge is at or below the floor and the device is not charging
    pub fn is_insufficient(&self, power: &dyn PowerSource) -> bool {
        power.charge_level() <= self.min_battery_level && !power.is_charging()
    }
}
