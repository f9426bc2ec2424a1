//! Periodic hand-off of rotated log files to the companion
//!
//! ## Overview
//!
//! [`BackupScanner`] wakes every period (default 60 s), lists the log files
//! under the storage root and enqueues them on the transfer [`Outbox`]. Delivery
//! events coming back from the outbox drive the per-file [`TransferState`]; a
//! file is renamed to `<name>.backd` only once the transport reports
//! [`DeliveryState::Transferred`] for that exact name.
//!
//! A scan may offer a file again while an earlier copy is still travelling.
//! The scanner counts the copies out per file; a failed copy sends the file
//! back to `Pending` only when no other copy can still be delivered.
//!
//! Acknowledged files are not deleted on the next scan. They are purged
//! explicitly by [`BackupScanner::delete_backed_up_files`], on `stop()`, and by
//! the device loop once every sensor has stopped.
//!
//! ## The newest file
//!
//! File names sort chronologically, so the lexically last one may still be
//! receiving appends. A scan skips it unless asked to include the active file.
//! Skipping it replaces any locking between the writer and the scanner.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::errors::TransferError;
use crate::hooks::{BackupHooks, NoopHooks};
use crate::store::{acknowledged_name, is_acknowledged, is_log_file, list_files};
use crate::time::Timestamp;
use crate::timer::Timer;
use crate::transfer::{DeliveryState, Enqueued, Outbox, TransferEvent, TransferState};

/// Default scan period (60 s)
pub const DEFAULT_BACKUP_PERIOD_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy)]
struct Tracked {
    state: TransferState,
    /// Copies handed to the outbox without a final event yet
    copies: usize,
}

pub struct BackupScanner {
    root: PathBuf,
    timer: Timer,
    outbox: Box<dyn Outbox>,
    hooks: Box<dyn BackupHooks>,
    files: BTreeMap<String, Tracked>,
}

impl BackupScanner {
    pub fn new(root: impl Into<PathBuf>, period_ms: u64, outbox: Box<dyn Outbox>) -> Self {
        Self {
            root: root.into(),
            timer: Timer::new(period_ms),
            outbox,
            hooks: Box::new(NoopHooks),
            files: BTreeMap::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Box<dyn BackupHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// In-memory delivery state of `name`; `None` when never enqueued
    pub fn state(&self, name: &str) -> Option<TransferState> {
        self.files.get(name).map(|tracked| tracked.state)
    }

    /// Arm the periodic scan
    pub fn start(&mut self, now: Timestamp) {
        self.timer.arm(now);
        info!("Backup scanner started, every {} ms", self.timer.period_ms());
    }

    /// Scan if the period elapsed; returns the enqueued names when a scan ran
    pub fn poll(&mut self, now: Timestamp) -> Option<Vec<String>> {
        if !self.timer.fire_if_due(now) {
            return None;
        }
        let enqueued = self.backup_to_companion(false);
        self.timer.arm(now);
        Some(enqueued)
    }

    /// Disarm the scan and purge acknowledged files; returns how many were removed
    pub fn stop(&mut self) -> usize {
        self.timer.disarm();
        info!("Backup scanner stopped");
        let deleted = self.delete_backed_up_files();
        self.hooks.on_backup_event();
        deleted
    }

    /// Enqueue every pending log file
    ///
    /// The lexically last file is skipped unless `include_active_file` is set.
    /// Enqueuing a file that is already in flight is allowed.
    pub fn backup_to_companion(&mut self, include_active_file: bool) -> Vec<String> {
        let mut names = match list_files(&self.root, is_log_file) {
            Ok(names) => names,
            Err(e) => {
                warn!("Cannot list {}: {}", self.root.display(), e);
                Vec::new()
            }
        };
        if !include_active_file {
            names.pop();
        }

        let mut enqueued = Vec::with_capacity(names.len());
        for name in names {
            let path = self.root.join(&name);
            let queued = match self.outbox.enqueue(&name, &path) {
                Ok(queued) => queued,
                Err(e) => {
                    error!("{}", e);
                    continue;
                }
            };

            let tracked = self.files.entry(name.clone()).or_insert(Tracked {
                state: TransferState::Pending,
                copies: 0,
            });
            if tracked.state == TransferState::Pending {
                tracked.state = TransferState::InFlight;
            }
            if queued == Enqueued::New {
                tracked.copies += 1;
            }
            debug!("{} queued for transfer ({} in flight)", name, tracked.copies);
            enqueued.push(name);
        }

        if !enqueued.is_empty() {
            info!("{} files queued for transfer", enqueued.len());
        }
        self.hooks.on_backup_event();
        enqueued
    }

    /// Apply one delivery event; returns the acknowledged path on success
    pub fn handle_transfer_event(&mut self, event: &TransferEvent) -> Result<Option<PathBuf>, TransferError> {
        let name = event.name.as_str();
        if !is_log_file(name) {
            warn!("Transfer event for unknown file {}", name);
            return Ok(None);
        }

        match event.state {
            DeliveryState::Transferred => self.acknowledge(name),
            DeliveryState::Error | DeliveryState::Canceled => {
                warn!("Transfer of {} ended: {}", name, event.state);
                if let Some(tracked) = self.files.get_mut(name) {
                    tracked.copies = tracked.copies.saturating_sub(1);
                    if tracked.copies == 0 {
                        tracked.state = tracked.state.transition(name, TransferState::Pending)?;
                    } else {
                        debug!("{} still has {} copies in flight", name, tracked.copies);
                    }
                }
                Ok(None)
            }
            DeliveryState::Pending | DeliveryState::Transferring => {
                debug!("{} {}", name, event.state);
                Ok(None)
            }
        }
    }

    fn acknowledge(&mut self, name: &str) -> Result<Option<PathBuf>, TransferError> {
        // files queued before a restart are not tracked but are still in flight
        let current = self
            .files
            .get(name)
            .map_or(TransferState::InFlight, |tracked| tracked.state);
        current.transition(name, TransferState::Acknowledged)?;

        let from = self.root.join(name);
        let to = self.root.join(acknowledged_name(name));
        match fs::rename(&from, &to) {
            Ok(()) => {
                self.files.remove(name);
                info!("{} transferred", name);
                Ok(Some(to))
            }
            Err(_) if to.exists() => {
                debug!("{} already marked as transferred", name);
                self.files.remove(name);
                Ok(None)
            }
            Err(e) => {
                error!("Cannot mark {} as transferred: {}", name, e);
                if let Some(tracked) = self.files.get_mut(name) {
                    tracked.copies = tracked.copies.saturating_sub(1);
                    if tracked.copies == 0 {
                        tracked.state = TransferState::Pending;
                    }
                }
                Ok(None)
            }
        }
    }

    /// Apply every waiting delivery event; returns how many files were acknowledged
    pub fn drain_transfer_events(&mut self) -> usize {
        let mut acknowledged = 0;
        loop {
            match self.outbox.poll_event() {
                Ok(event) => match self.handle_transfer_event(&event) {
                    Ok(Some(_)) => acknowledged += 1,
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                },
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    warn!("Transfer events unavailable: {}", e);
                    break;
                }
            }
        }
        acknowledged
    }

    /// Remove every acknowledged file; pending and active files are never touched
    pub fn delete_backed_up_files(&mut self) -> usize {
        let names = match list_files(&self.root, is_acknowledged) {
            Ok(names) => names,
            Err(e) => {
                warn!("Cannot list {}: {}", self.root.display(), e);
                return 0;
            }
        };

        let mut deleted = 0;
        for name in names {
            match fs::remove_file(self.root.join(&name)) {
                Ok(()) => {
                    info!("{} deleted", name);
                    deleted += 1;
                }
                Err(e) => error!("Cannot delete {}: {}", name, e),
            }
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookEvent, RecordingHooks};
    use crate::transfer::{Inbox, LocalLink};
    use tempfile::TempDir;

    const A: &str = "heartrate_20240101-120000.log.csv";
    const B: &str = "heartrate_20240101-120530.log.csv";

    fn scanner_with(files: &[&str]) -> (TempDir, LocalLink, BackupScanner) {
        let dir = TempDir::new().unwrap();
        for name in files {
            fs::write(dir.path().join(name), "timestamp;sensor;data\n").unwrap();
        }
        let link = LocalLink::new();
        let scanner = BackupScanner::new(dir.path(), DEFAULT_BACKUP_PERIOD_MS, Box::new(link.clone()));
        (dir, link, scanner)
    }

    #[test]
    fn newest_file_is_excluded_by_default() {
        let (_dir, link, mut scanner) = scanner_with(&[B, A, "notes.txt"]);
        assert_eq!(scanner.backup_to_companion(false), vec![A.to_string()]);
        assert_eq!(link.queued(), vec![A.to_string()]);
        assert_eq!(scanner.state(A), Some(TransferState::InFlight));
        assert_eq!(scanner.state(B), None);
    }

    #[test]
    fn include_active_sends_everything() {
        let (_dir, _link, mut scanner) = scanner_with(&[A, B]);
        assert_eq!(scanner.backup_to_companion(true), vec![A.to_string(), B.to_string()]);
    }

    #[test]
    fn rescan_before_ack_is_tolerated() {
        let (_dir, link, mut scanner) = scanner_with(&[A, B]);
        let first = scanner.backup_to_companion(false);
        let second = scanner.backup_to_companion(false);
        assert_eq!(first, second);
        assert_eq!(link.queued(), vec![A.to_string()]);
        assert_eq!(scanner.state(A), Some(TransferState::InFlight));
    }

    #[test]
    fn transferred_event_renames_exact_file() {
        let (dir, mut link, mut scanner) = scanner_with(&[A, B]);
        scanner.backup_to_companion(false);
        assert_eq!(scanner.drain_transfer_events(), 0);
        assert!(dir.path().join(A).exists());

        let file = link.pop().unwrap();
        link.report(&file.name, DeliveryState::Transferred).unwrap();
        assert_eq!(scanner.drain_transfer_events(), 1);

        assert!(!dir.path().join(A).exists());
        assert!(dir.path().join(format!("{A}.backd")).exists());
        assert!(dir.path().join(B).exists());
        assert_eq!(scanner.state(A), None);
    }

    #[test]
    fn later_copy_is_acknowledged_after_earlier_copy_failed() {
        let (dir, mut link, mut scanner) = scanner_with(&[A, B]);
        scanner.backup_to_companion(false);
        let first = link.pop().unwrap();
        scanner.backup_to_companion(false);
        let second = link.pop().unwrap();

        link.report(&first.name, DeliveryState::Error).unwrap();
        link.report(&second.name, DeliveryState::Transferred).unwrap();
        assert_eq!(scanner.drain_transfer_events(), 1);

        assert!(!dir.path().join(A).exists());
        assert!(dir.path().join(format!("{A}.backd")).exists());
        assert_eq!(scanner.state(A), None);
    }

    #[test]
    fn replaced_copy_is_counted_once() {
        let (_dir, mut link, mut scanner) = scanner_with(&[A, B]);
        scanner.backup_to_companion(false);
        scanner.backup_to_companion(false);

        let file = link.pop().unwrap();
        link.report(&file.name, DeliveryState::Error).unwrap();
        assert_eq!(scanner.drain_transfer_events(), 0);
        assert_eq!(scanner.state(A), Some(TransferState::Pending));
    }

    #[test]
    fn duplicate_transferred_event_is_harmless() {
        let (dir, mut link, mut scanner) = scanner_with(&[A, B]);
        scanner.backup_to_companion(false);
        let first = link.pop().unwrap();
        scanner.backup_to_companion(false);
        let second = link.pop().unwrap();

        link.report(&first.name, DeliveryState::Transferred).unwrap();
        link.report(&second.name, DeliveryState::Transferred).unwrap();
        assert_eq!(scanner.drain_transfer_events(), 1);
        assert!(dir.path().join(format!("{A}.backd")).exists());
        assert_eq!(scanner.state(A), None);
    }

    #[test]
    fn failed_transfer_returns_file_to_pending() {
        let (dir, _link, mut scanner) = scanner_with(&[A, B]);
        scanner.backup_to_companion(false);

        let event = TransferEvent::new(A, DeliveryState::Error);
        assert_eq!(scanner.handle_transfer_event(&event).unwrap(), None);
        assert_eq!(scanner.state(A), Some(TransferState::Pending));
        assert!(dir.path().join(A).exists());

        // a second failure for the same file is an illegal move from Pending
        assert!(matches!(
            scanner.handle_transfer_event(&event),
            Err(TransferError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn acknowledging_a_pending_file_is_refused() {
        let (dir, _link, mut scanner) = scanner_with(&[A, B]);
        scanner.backup_to_companion(false);
        scanner
            .handle_transfer_event(&TransferEvent::new(A, DeliveryState::Canceled))
            .unwrap();

        let result = scanner.handle_transfer_event(&TransferEvent::new(A, DeliveryState::Transferred));
        assert!(result.is_err());
        assert!(dir.path().join(A).exists());
    }

    #[test]
    fn events_for_foreign_names_are_ignored() {
        let (dir, _link, mut scanner) = scanner_with(&[A]);
        let event = TransferEvent::new("../etc/passwd", DeliveryState::Transferred);
        assert_eq!(scanner.handle_transfer_event(&event).unwrap(), None);
        assert!(dir.path().join(A).exists());
    }

    #[test]
    fn delete_removes_only_acknowledged_files() {
        let backd = format!("{A}.backd");
        let (dir, _link, mut scanner) = scanner_with(&[&backd, B, "notes.txt"]);
        assert_eq!(scanner.delete_backed_up_files(), 1);
        assert!(!dir.path().join(&backd).exists());
        assert!(dir.path().join(B).exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn poll_scans_once_per_period() {
        let (_dir, _link, mut scanner) = scanner_with(&[A, B]);
        scanner.start(0);
        assert_eq!(scanner.poll(59_999), None);
        assert_eq!(scanner.poll(60_000), Some(vec![A.to_string()]));
        assert_eq!(scanner.timer().deadline(), Some(120_000));
        assert_eq!(scanner.poll(60_001), None);
    }

    #[test]
    fn stop_purges_and_notifies() {
        let backd = format!("{A}.backd");
        let (dir, link, scanner) = scanner_with(&[&backd, B]);
        let hooks = RecordingHooks::new();
        let mut scanner = scanner.with_hooks(Box::new(hooks.clone()));
        drop(link);

        scanner.start(0);
        assert_eq!(scanner.stop(), 1);
        assert!(!scanner.timer().is_armed());
        assert!(!dir.path().join(&backd).exists());
        assert_eq!(hooks.events(), vec![HookEvent::Backup]);
    }

    #[test]
    fn missing_root_yields_empty_scan() {
        let dir = TempDir::new().unwrap();
        let mut scanner = BackupScanner::new(dir.path().join("absent"), 1_000, Box::new(LocalLink::new()));
        assert!(scanner.backup_to_companion(true).is_empty());
        assert_eq!(scanner.delete_backed_up_files(), 0);
    }
}
