//! Rotating, quota-bounded log storage
//!
//! ## Overview
//!
//! Each sensor source owns one [`LogStore`]. The store appends formatted
//! batches to a single active CSV file, rotates to a fresh file once the
//! active one exceeds a size ceiling, and refuses writes that would push the
//! whole storage directory over a hard quota.
//!
//! ## File naming
//!
//! ```text
//! <name>_<YYYYMMDD-HHMMSS>.log.csv          rotated/active log, "pending"
//! <name>_<YYYYMMDD-HHMMSS>.log.csv.backd    delivered, safe to delete
//! ```
//!
//! The timestamp has second resolution, so a lexical sort of the names is also
//! a chronological sort. The backup scanner relies on that to tell the newest
//! (possibly still active) file apart from completed ones.
//!
//! ## Append sequence
//!
//! 1. Sum the size of every file under the storage root. Reject the write if
//!    it would exceed the quota; nothing is touched in that case.
//! 2. Rotate when the active file is larger than the ceiling or unreadable.
//! 3. Open the active file in append mode, write, close.
//!
//! No handle stays open between appends. On a device without buffered-writer
//! flush guarantees this bounds what a crash can lose to the current write.
//!
//! ## Failure handling
//!
//! A store that cannot create its log file becomes disabled: every later
//! append fails fast with [`StoreError::Disabled`] instead of retrying.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{StoreError, StoreResult};
use crate::format::CSV_HEADER;
use crate::time::{file_stamp, NameClock, SharedClock, Timestamp};

/// Suffix marking a file as delivered to the remote endpoint
pub const ACK_SUFFIX: &str = "backd";

/// Default per-file size ceiling (500 KiB)
pub const DEFAULT_FILE_SIZE_LIMIT: u64 = 500 * 1024;

/// Default quota for the whole storage root (~4.5 MB)
pub const DEFAULT_STORAGE_QUOTA: u64 = 4_608_000;

/// Upper bound on one-second steps taken to find a free rotation name
const MAX_NAME_PROBES: u64 = 3600;

lazy_static! {
    static ref LOG_FILE_RE: Regex =
        Regex::new(r"^(\w+)_(\d{8}-\d{6})\.log\.csv$").expect("log file pattern is valid");
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding every log file
    pub root: PathBuf,
    /// Active file is rotated once larger than this many bytes
    pub file_size_limit: u64,
    /// Hard cap on the summed size of every file under `root`
    pub storage_quota: u64,
    /// Time zone of the timestamp encoded in file names
    pub name_clock: NameClock,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("wearlog-data"),
            file_size_limit: DEFAULT_FILE_SIZE_LIMIT,
            storage_quota: DEFAULT_STORAGE_QUOTA,
            name_clock: NameClock::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn file_size_limit(mut self, bytes: u64) -> Self {
        self.file_size_limit = bytes;
        self
    }

    pub fn storage_quota(mut self, bytes: u64) -> Self {
        self.storage_quota = bytes;
        self
    }

    pub fn name_clock(mut self, clock: NameClock) -> Self {
        self.name_clock = clock;
        self
    }
}

/// Parsed `<name>_<YYYYMMDD-HHMMSS>.log.csv` file name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogFileName {
    pub source: String,
    /// `YYYYMMDD-HHMMSS`
    pub stamp: String,
}

impl LogFileName {
    /// Name for a file created at `timestamp`
    pub fn at(source: &str, timestamp: Timestamp, clock: NameClock) -> Self {
        Self {
            source: source.to_string(),
            stamp: file_stamp(timestamp, clock),
        }
    }

    /// Parse a bare file name; anything off-grammar is `None`
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = LOG_FILE_RE.captures(file_name)?;
        Some(Self {
            source: caps[1].to_string(),
            stamp: caps[2].to_string(),
        })
    }
}

impl fmt::Display for LogFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}.log.csv", self.source, self.stamp)
    }
}

/// Whether `file_name` is a pending (rotated or active) log file
pub fn is_log_file(file_name: &str) -> bool {
    LOG_FILE_RE.is_match(file_name)
}

/// Whether `file_name` carries the delivery acknowledgement suffix
pub fn is_acknowledged(file_name: &str) -> bool {
    file_name
        .strip_suffix(ACK_SUFFIX)
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|rest| !rest.is_empty())
}

/// Acknowledged name for a pending file
pub fn acknowledged_name(file_name: &str) -> String {
    format!("{}.{}", file_name, ACK_SUFFIX)
}

/// Sorted bare names of files under `root` accepted by `filter`
pub fn list_files(root: &Path, filter: impl Fn(&str) -> bool) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if filter(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Total bytes used by every file under `root`
pub fn storage_usage(root: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(root)? {
        let metadata = entry?.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Outcome of a successful append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReport {
    /// File the data landed in
    pub path: PathBuf,
    pub bytes: u64,
    /// Whether a new file was started for this append
    pub rotated: bool,
}

/// Append-only log file manager for one source
pub struct LogStore {
    source: String,
    config: StoreConfig,
    clock: SharedClock,
    /// `None` once the store is disabled
    active: Option<PathBuf>,
}

impl fmt::Debug for LogStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStore")
            .field("source", &self.source)
            .field("config", &self.config)
            .field("active", &self.active)
            .finish()
    }
}

impl LogStore {
    /// Open a store, creating its first log file if needed
    ///
    /// Never fails: a store whose file cannot be created comes back disabled.
    pub fn open(source: &str, config: StoreConfig, clock: SharedClock) -> Self {
        let mut store = Self {
            source: source.to_string(),
            config,
            clock,
            active: None,
        };

        match store.init_file() {
            Ok(path) => store.active = Some(path),
            Err(e) => error!("LogStore({}): logging file cannot be created: {}", store.source, e),
        }
        store
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Path of the file currently receiving appends
    pub fn active_file(&self) -> Option<&Path> {
        self.active.as_deref()
    }

    pub fn is_disabled(&self) -> bool {
        self.active.is_none()
    }

    /// Append one pre-formatted chunk of records
    pub fn append(&mut self, data: &str) -> StoreResult<AppendReport> {
        let Some(active) = self.active.clone() else {
            error!("LogStore({}): store disabled, dropping {} bytes", self.source, data.len());
            return Err(StoreError::Disabled(self.source.clone()));
        };

        let root = &self.config.root;
        let used = storage_usage(root).map_err(|e| StoreError::io(root, e))?;
        let requested = data.len() as u64;
        if used.saturating_add(requested) > self.config.storage_quota {
            error!(
                "LogStore({}): cannot write {} bytes of data, free space: {}",
                self.source,
                requested,
                self.config.storage_quota.saturating_sub(used)
            );
            return Err(StoreError::QuotaExceeded {
                requested,
                used,
                quota: self.config.storage_quota,
            });
        }

        let needs_rotation = match fs::metadata(&active) {
            Ok(meta) => meta.len() > self.config.file_size_limit,
            Err(e) => {
                warn!("LogStore({}): {} cannot be read: {}", self.source, active.display(), e);
                true
            }
        };

        let target = if needs_rotation {
            self.rotate()?
        } else {
            active
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .map_err(|e| StoreError::io(&target, e))?;
        file.write_all(data.as_bytes())
            .map_err(|e| StoreError::io(&target, e))?;
        drop(file);

        debug!(
            "LogStore({}): wrote {} bytes to {}",
            self.source,
            requested,
            target.display()
        );
        Ok(AppendReport {
            path: target,
            bytes: requested,
            rotated: needs_rotation,
        })
    }

    /// Start a new active file; disables the store on failure
    fn rotate(&mut self) -> StoreResult<PathBuf> {
        let previous = self.active.take();
        match self.create_rotated(previous.as_deref()) {
            Ok(path) => {
                info!(
                    "LogStore({}): rotated {} -> {}",
                    self.source,
                    previous.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
                    path.display()
                );
                self.active = Some(path.clone());
                Ok(path)
            }
            Err(e) => {
                error!("LogStore({}): failed to create logfile, store disabled: {}", self.source, e);
                Err(e)
            }
        }
    }

    /// First file for this store: reuse an existing file of the same name
    fn init_file(&self) -> StoreResult<PathBuf> {
        let root = &self.config.root;
        fs::create_dir_all(root).map_err(|e| StoreError::io(root, e))?;

        let name = LogFileName::at(&self.source, self.clock.now(), self.config.name_clock);
        let path = root.join(name.to_string());
        if !path.exists() {
            write_header(&path)?;
        }
        Ok(path)
    }

    /// New file named after "now", stepping forward one second at a time
    /// until the name is free and sorts after the previous file
    fn create_rotated(&self, previous: Option<&Path>) -> StoreResult<PathBuf> {
        let root = &self.config.root;
        fs::create_dir_all(root).map_err(|e| StoreError::io(root, e))?;

        let previous_name = previous
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let now = self.clock.now();

        for step in 0..MAX_NAME_PROBES {
            let name = LogFileName::at(&self.source, now + step * 1000, self.config.name_clock).to_string();
            let sorts_after = previous_name.as_deref().map_or(true, |prev| name.as_str() > prev);
            let path = root.join(&name);
            if sorts_after && !path.exists() {
                write_header(&path)?;
                return Ok(path);
            }
        }

        Err(StoreError::io(
            root,
            io::Error::new(io::ErrorKind::AlreadyExists, "no free log file name"),
        ))
    }
}

fn write_header(path: &Path) -> StoreResult<()> {
    fs::write(path, format!("{}\n", CSV_HEADER)).map_err(|e| StoreError::io(path, e))?;
    if !path.exists() {
        return Err(StoreError::io(
            path,
            io::Error::new(io::ErrorKind::NotFound, "file vanished after creation"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MockTimeSource;
    use std::sync::Arc;
    use tempfile::TempDir;

    // 2024-01-01T12:00:00Z
    const NOON: Timestamp = 1_704_110_400_000;

    fn store_in(dir: &TempDir, clock: &MockTimeSource) -> LogStore {
        let config = StoreConfig::new(dir.path())
            .file_size_limit(100)
            .storage_quota(1_000)
            .name_clock(NameClock::Utc);
        LogStore::open("heartrate", config, Arc::new(clock.clone()))
    }

    #[test]
    fn filename_grammar() {
        assert!(is_log_file("heartrate_20240101-120000.log.csv"));
        assert!(is_log_file("heart_rate_20240101-120000.log.csv"));
        assert!(!is_log_file("heartrate_20240101-120000.log.csv.backd"));
        assert!(!is_log_file("heartrate_2024011-120000.log.csv"));
        assert!(!is_log_file("settings.json"));

        let parsed = LogFileName::parse("gyroscope_20240101-120530.log.csv").unwrap();
        assert_eq!(parsed.source, "gyroscope");
        assert_eq!(parsed.stamp, "20240101-120530");
        assert_eq!(parsed.to_string(), "gyroscope_20240101-120530.log.csv");
    }

    #[test]
    fn acknowledgement_suffix() {
        assert!(is_acknowledged("heartrate_20240101-120000.log.csv.backd"));
        assert!(!is_acknowledged("heartrate_20240101-120000.log.csv"));
        assert!(!is_acknowledged(".backd"));
        assert_eq!(acknowledged_name("a.log.csv"), "a.log.csv.backd");
    }

    #[test]
    fn open_creates_file_with_header() {
        let dir = TempDir::new().unwrap();
        let clock = MockTimeSource::new(NOON);
        let store = store_in(&dir, &clock);

        let active = store.active_file().unwrap();
        assert_eq!(
            active.file_name().unwrap().to_str().unwrap(),
            "heartrate_20240101-120000.log.csv"
        );
        assert_eq!(fs::read_to_string(active).unwrap(), "timestamp;sensor;data\n");
    }

    #[test]
    fn reopen_in_same_second_reuses_file() {
        let dir = TempDir::new().unwrap();
        let clock = MockTimeSource::new(NOON);
        let mut first = store_in(&dir, &clock);
        first.append("1;HRTR;60\n").unwrap();

        let second = store_in(&dir, &clock);
        assert_eq!(first.active_file(), second.active_file());
        let content = fs::read_to_string(second.active_file().unwrap()).unwrap();
        assert_eq!(content, "timestamp;sensor;data\n1;HRTR;60\n");
    }

    #[test]
    fn rotates_once_over_ceiling() {
        let dir = TempDir::new().unwrap();
        let clock = MockTimeSource::new(NOON);
        let mut store = store_in(&dir, &clock);
        let first = store.active_file().unwrap().to_path_buf();

        // header (22) + 90 = 112 > 100, but the check happens before writing
        let report = store.append(&"x".repeat(90)).unwrap();
        assert!(!report.rotated);
        assert_eq!(report.path, first);

        clock.advance(330_000);
        let report = store.append("next\n").unwrap();
        assert!(report.rotated);
        assert_ne!(report.path, first);
        assert_eq!(
            report.path.file_name().unwrap().to_str().unwrap(),
            "heartrate_20240101-120530.log.csv"
        );
        assert_eq!(fs::metadata(&first).unwrap().len(), 112);
    }

    #[test]
    fn rotation_within_same_second_gets_a_later_name() {
        let dir = TempDir::new().unwrap();
        let clock = MockTimeSource::new(NOON);
        let mut store = store_in(&dir, &clock);

        store.append(&"x".repeat(90)).unwrap();
        let report = store.append("y\n").unwrap();
        assert!(report.rotated);
        assert_eq!(
            report.path.file_name().unwrap().to_str().unwrap(),
            "heartrate_20240101-120001.log.csv"
        );
    }

    #[test]
    fn quota_rejects_without_touching_files() {
        let dir = TempDir::new().unwrap();
        let clock = MockTimeSource::new(NOON);
        let config = StoreConfig::new(dir.path())
            .storage_quota(64)
            .name_clock(NameClock::Utc);
        let mut store = LogStore::open("heartrate", config, Arc::new(clock));
        let active = store.active_file().unwrap().to_path_buf();

        let err = store.append(&"z".repeat(43)).unwrap_err();
        match err {
            StoreError::QuotaExceeded { requested, used, quota } => {
                assert_eq!((requested, used, quota), (43, 22, 64));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(fs::metadata(&active).unwrap().len(), 22);

        // exactly at the quota is allowed
        store.append(&"z".repeat(42)).unwrap();
    }

    #[test]
    fn unreadable_active_file_triggers_rotation() {
        let dir = TempDir::new().unwrap();
        let clock = MockTimeSource::new(NOON);
        let mut store = store_in(&dir, &clock);
        let first = store.active_file().unwrap().to_path_buf();
        fs::remove_file(&first).unwrap();

        let report = store.append("a\n").unwrap();
        assert!(report.rotated);
        assert!(!first.exists());
        let content = fs::read_to_string(&report.path).unwrap();
        assert_eq!(content, "timestamp;sensor;data\na\n");
    }

    #[test]
    fn uncreatable_root_disables_store() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();

        let clock = MockTimeSource::new(NOON);
        let mut store = LogStore::open("heartrate", StoreConfig::new(&blocker), Arc::new(clock));
        assert!(store.is_disabled());
        assert!(matches!(store.append("a\n"), Err(StoreError::Disabled(_))));
    }

    #[test]
    fn listing_is_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in [
            "heartrate_20240101-120530.log.csv",
            "heartrate_20240101-120000.log.csv",
            "heartrate_20231231-235959.log.csv.backd",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("subdir_20240101-120000.log.csv")).unwrap();

        let logs = list_files(dir.path(), is_log_file).unwrap();
        assert_eq!(
            logs,
            vec![
                "heartrate_20240101-120000.log.csv".to_string(),
                "heartrate_20240101-120530.log.csv".to_string(),
            ]
        );
        assert_eq!(storage_usage(dir.path()).unwrap(), 4);
    }
}
