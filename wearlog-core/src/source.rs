//! One sensor wired to its log store
//!
//! A [`SensorSource`] owns a device and the [`LogStore`] its records go to.
//! Every completed batch is formatted as a whole and written with a single
//! append call, never line by line, to bound the number of storage operations.

use log::{debug, info, warn};

use crate::device::{SensorBackend, SensorDevice};
use crate::errors::{SensorError, StoreResult};
use crate::format::{format_batch, ReadingBatch};
use crate::sensors::{SensorDescriptor, SensorKind};
use crate::store::{AppendReport, LogStore, StoreConfig};
use crate::time::{SharedClock, Timestamp};

pub struct SensorSource {
    descriptor: SensorDescriptor,
    device: Box<dyn SensorDevice>,
    store: LogStore,
    clock: SharedClock,
}

impl SensorSource {
    /// Open the device and its log store
    ///
    /// Fails only when the backend cannot provide the device; a store that
    /// cannot create its file is kept in its disabled state.
    pub fn new(
        descriptor: SensorDescriptor,
        backend: &mut dyn SensorBackend,
        store_config: &StoreConfig,
        clock: SharedClock,
    ) -> Result<Self, SensorError> {
        let device = backend.open(&descriptor)?;
        let store = LogStore::open(descriptor.kind.name(), store_config.clone(), clock.clone());
        info!(
            "{} sensor initialized ({} Hz, batch {})",
            descriptor.kind, descriptor.frequency_hz, descriptor.batch_size
        );

        Ok(Self {
            descriptor,
            device,
            store,
            clock,
        })
    }

    pub fn kind(&self) -> SensorKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    pub fn is_active(&self) -> bool {
        self.device.is_active()
    }

    pub fn start(&mut self) -> Result<(), SensorError> {
        self.device.start()?;
        info!("{} sensor started", self.kind());
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), SensorError> {
        self.device.stop()?;
        info!("{} sensor stopped", self.kind());
        Ok(())
    }

    /// Drain every ready batch into the store; returns how many were written
    pub fn pump(&mut self) -> usize {
        let mut written = 0;
        loop {
            match self.device.poll_batch() {
                Ok(batch) => {
                    let arrival = self.clock.now();
                    match self.record(&batch, arrival) {
                        Ok(Some(_)) => written += 1,
                        Ok(None) => {}
                        Err(e) => warn!("{}: batch of {} samples dropped: {}", self.kind(), batch.len(), e),
                    }
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    warn!("{}: reading failed: {}", self.kind(), e);
                    break;
                }
            }
        }
        written
    }

    /// Format one batch that arrived at `arrival` and append it
    pub fn record(&mut self, batch: &ReadingBatch, arrival: Timestamp) -> StoreResult<Option<AppendReport>> {
        if batch.is_empty() {
            return Ok(None);
        }
        debug!("{}: {} records", self.kind(), batch.len());
        let text = format_batch(&self.descriptor, batch, arrival);
        self.store.append(&text).map(Some)
    }
}
