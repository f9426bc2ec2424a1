//! Sensor hardware abstraction
//!
//! [`SensorBackend`] opens devices for catalog entries and reports hardware
//! absence with [`SensorError::Unavailable`]. A [`SensorDevice`] is started and
//! stopped fire-and-forget; completed batches are picked up by polling, which
//! is how the cooperative device loop serializes hardware callbacks.
//!
//! [`SimulatedBackend`] is a fully functional in-memory backend used by the
//! tests and by host-side simulation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::SensorError;
use crate::format::ReadingBatch;
use crate::sensors::{SensorDescriptor, SensorKind};

/// One physical sensor
pub trait SensorDevice: Send {
    fn start(&mut self) -> Result<(), SensorError>;

    fn stop(&mut self) -> Result<(), SensorError>;

    /// Whether the hardware is currently sampling
    fn is_active(&self) -> bool;

    /// Take the next completed batch, `WouldBlock` if none is ready
    fn poll_batch(&mut self) -> nb::Result<ReadingBatch, SensorError>;
}

/// Factory for sensor devices
pub trait SensorBackend: Send {
    /// Open the device for `descriptor`, or report that it is absent
    fn open(&mut self, descriptor: &SensorDescriptor) -> Result<Box<dyn SensorDevice>, SensorError>;
}

#[derive(Debug, Default)]
struct SimState {
    descriptor: Option<SensorDescriptor>,
    active: bool,
    pending: VecDeque<ReadingBatch>,
    fail_start: bool,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Test/simulation handle onto an opened simulated sensor
#[derive(Debug, Clone)]
pub struct SimulatedHandle {
    kind: SensorKind,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Parameters the device was opened with
    pub fn descriptor(&self) -> Option<SensorDescriptor> {
        lock(&self.state).descriptor
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    /// Deliver a batch; returns `false` when dropped because the sensor is stopped
    pub fn deliver(&self, batch: ReadingBatch) -> bool {
        let mut state = lock(&self.state);
        if !state.active {
            return false;
        }
        state.pending.push_back(batch);
        true
    }

    /// Make the next `start()` fail with a device fault
    pub fn fail_next_start(&self) {
        lock(&self.state).fail_start = true;
    }
}

struct SimulatedSensor {
    kind: SensorKind,
    state: Arc<Mutex<SimState>>,
}

impl SensorDevice for SimulatedSensor {
    fn start(&mut self) -> Result<(), SensorError> {
        let mut state = lock(&self.state);
        if state.fail_start {
            state.fail_start = false;
            return Err(SensorError::Device {
                sensor: self.kind.name(),
                reason: "start rejected".into(),
            });
        }
        state.active = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SensorError> {
        let mut state = lock(&self.state);
        state.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    fn poll_batch(&mut self) -> nb::Result<ReadingBatch, SensorError> {
        lock(&self.state)
            .pending
            .pop_front()
            .ok_or(nb::Error::WouldBlock)
    }
}

/// In-memory backend with a configurable set of present sensors
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    available: HashSet<SensorKind>,
    opened: Arc<Mutex<HashMap<SensorKind, Arc<Mutex<SimState>>>>>,
}

impl SimulatedBackend {
    /// Backend where every catalog sensor is present
    pub fn new() -> Self {
        Self::with_sensors(&SensorKind::ALL)
    }

    /// Backend where only `kinds` are present
    pub fn with_sensors(kinds: &[SensorKind]) -> Self {
        Self {
            available: kinds.iter().copied().collect(),
            opened: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle onto the most recently opened device of `kind`
    pub fn handle(&self, kind: SensorKind) -> Option<SimulatedHandle> {
        let opened = self.opened.lock().unwrap_or_else(|p| p.into_inner());
        opened.get(&kind).map(|state| SimulatedHandle {
            kind,
            state: Arc::clone(state),
        })
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorBackend for SimulatedBackend {
    fn open(&mut self, descriptor: &SensorDescriptor) -> Result<Box<dyn SensorDevice>, SensorError> {
        let kind = descriptor.kind;
        if !self.available.contains(&kind) {
            return Err(SensorError::Unavailable(kind.name()));
        }

        let state = Arc::new(Mutex::new(SimState {
            descriptor: Some(*descriptor),
            ..SimState::default()
        }));
        self.opened
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(kind, Arc::clone(&state));

        Ok(Box::new(SimulatedSensor { kind, state }))
    }
}
