//! Time management for the capture pipeline
//!
//! Every component that needs "now" (batch timestamp reconstruction, log file
//! naming, watchdog and backup deadlines) reads it through [`TimeSource`], so
//! the whole device loop can be driven by a [`MockTimeSource`] in tests.
//!
//! - [`SystemTime`]: wall clock, milliseconds since the Unix epoch
//! - [`MockTimeSource`]: shared, manually advanced clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp in milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Clock handle shared by the manager, the log stores and the scanner
pub type SharedClock = Arc<dyn TimeSource>;

/// Source of time for the system
pub trait TimeSource: Send + Sync {
    /// Get current timestamp in milliseconds
    fn now(&self) -> Timestamp;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime as StdSystemTime, UNIX_EPOCH};

        StdSystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

/// Controllable time for testing
///
/// Clones share the same underlying counter, so a test can keep one handle
/// and advance the clock seen by every component it handed a clone to.
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    now: Arc<AtomicU64>,
}

impl MockTimeSource {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, timestamp: Timestamp) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Time zone used when encoding creation time into log file names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameClock {
    /// Device local time, as the watch face shows it
    #[default]
    Local,
    /// UTC, stable across time zone changes
    Utc,
}

/// Format a timestamp as `YYYYMMDD-HHMMSS` (second resolution)
pub fn file_stamp(timestamp: Timestamp, clock: NameClock) -> String {
    let utc = DateTime::<Utc>::from_timestamp_millis(timestamp as i64).unwrap_or_default();
    match clock {
        NameClock::Utc => utc.format("%Y%m%d-%H%M%S").to_string(),
        NameClock::Local => utc.with_timezone(&Local).format("%Y%m%d-%H%M%S").to_string(),
    }
}
