//! Sample formatting
//!
//! Hardware delivers readings in batches whose timestamps are relative to an
//! unknown epoch. The formatter turns one batch into absolute-timestamped
//! records, one line per sample:
//!
//! ```text
//! <absoluteMs>;<TAG>;<field>[,<field>...]
//! ```
//!
//! ## Timestamp reconstruction
//!
//! The first sample is placed at `arrival - batch_size / frequency_hz * 1000`,
//! i.e. the clock is walked back by the nominal time a full batch takes to
//! accumulate. Every following sample adds the running sum of relative deltas.
//! This assumes uniform sampling and no scheduling jitter; nothing corrects it
//! against a reference clock.

use core::fmt::Write;

use crate::sensors::SensorDescriptor;
use crate::time::Timestamp;

/// Header line written at the top of every log file
pub const CSV_HEADER: &str = "timestamp;sensor;data";

/// Field values of a single sample (x/y/z or a single metric)
pub type Sample = heapless::Vec<f32, 3>;

/// One hardware reading event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingBatch {
    /// Per-sample timestamps, relative to an unknown epoch
    pub relative_timestamps: Vec<u64>,
    pub samples: Vec<Sample>,
}

impl ReadingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample; fields beyond the third are dropped
    pub fn push(&mut self, relative_timestamp: u64, fields: &[f32]) {
        let sample = fields.iter().copied().take(3).collect::<Sample>();
        self.relative_timestamps.push(relative_timestamp);
        self.samples.push(sample);
    }

    /// Number of complete (timestamp, sample) pairs
    pub fn len(&self) -> usize {
        self.relative_timestamps.len().min(self.samples.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Estimated absolute time of the first sample of a batch
pub fn batch_start(descriptor: &SensorDescriptor, arrival: Timestamp) -> Timestamp {
    arrival.saturating_sub(descriptor.batch_span_ms())
}

/// Absolute timestamps for every sample of `batch`
pub fn absolute_timestamps(
    descriptor: &SensorDescriptor,
    batch: &ReadingBatch,
    arrival: Timestamp,
) -> Vec<Timestamp> {
    let first = batch_start(descriptor, arrival) as i64;
    let mut offset: i64 = 0;
    let mut previous: Option<u64> = None;

    batch
        .relative_timestamps
        .iter()
        .take(batch.len())
        .map(|&relative| {
            if let Some(prev) = previous {
                offset += relative as i64 - prev as i64;
            }
            previous = Some(relative);
            (first + offset).max(0) as Timestamp
        })
        .collect()
}

/// Render a whole batch as one multi-line string
pub fn format_batch(descriptor: &SensorDescriptor, batch: &ReadingBatch, arrival: Timestamp) -> String {
    let tag = descriptor.kind.tag();
    let timestamps = absolute_timestamps(descriptor, batch, arrival);
    let mut out = String::with_capacity(batch.len() * 32);

    for (timestamp, sample) in timestamps.iter().zip(&batch.samples) {
        // Writing into a String cannot fail
        let _ = write!(out, "{};{};", timestamp, tag);
        for (i, value) in sample.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{}", value);
        }
        out.push('\n');
    }

    out
}
