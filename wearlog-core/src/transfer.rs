//! Device/companion file transfer link
//!
//! The device hands completed log files to an [`Outbox`] and learns about
//! delivery progress by polling [`TransferEvent`]s from it. The companion pulls
//! files from an [`Inbox`] and reports the outcome of each upload back.
//!
//! [`LocalLink`] implements both sides in-process. Clones share one queue, so
//! the device loop and a companion thread can each hold a handle.
//!
//! ## Delivery bookkeeping
//!
//! The device side tracks each file with a [`TransferState`]:
//!
//! ```text
//!  Pending ──enqueue──→ InFlight ──Transferred──→ Acknowledged
//!     ↑                    │
//!     └──Error/Canceled────┘
//! ```
//!
//! `Acknowledged` is terminal. On disk it is the `.backd` suffix; the other
//! states live only in memory.

use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::errors::TransferError;

/// Per-file delivery state kept by the backup scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Pending,
    InFlight,
    Acknowledged,
}

impl TransferState {
    pub const fn can_transition(self, to: TransferState) -> bool {
        matches!(
            (self, to),
            (TransferState::Pending, TransferState::InFlight)
                | (TransferState::InFlight, TransferState::Pending)
                | (TransferState::InFlight, TransferState::Acknowledged)
        )
    }

    /// Checked transition for the file `name`
    pub fn transition(self, name: &str, to: TransferState) -> Result<TransferState, TransferError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(TransferError::IllegalTransition {
                name: name.to_string(),
                from: self,
                to,
            })
        }
    }
}

/// Delivery progress reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    Pending,
    Transferring,
    Transferred,
    Canceled,
    Error,
}

impl DeliveryState {
    /// No further events follow for this transfer
    pub const fn is_final(self) -> bool {
        matches!(
            self,
            DeliveryState::Transferred | DeliveryState::Canceled | DeliveryState::Error
        )
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Transferring => "transferring",
            DeliveryState::Transferred => "transferred",
            DeliveryState::Canceled => "canceled",
            DeliveryState::Error => "error",
        };
        f.write_str(s)
    }
}

/// State change for one named file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub name: String,
    pub state: DeliveryState,
}

impl TransferEvent {
    pub fn new(name: impl Into<String>, state: DeliveryState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }
}

/// What an [`Outbox::enqueue`] did with the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new copy is on its way
    New,
    /// A copy of the same name was still waiting and now carries the new contents
    Replaced,
}

/// A file as received by the companion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Device side of the link
pub trait Outbox: Send {
    /// Queue the file at `path` for transfer under `name`
    fn enqueue(&mut self, name: &str, path: &Path) -> Result<Enqueued, TransferError>;

    /// Next delivery event, `WouldBlock` when none is waiting
    fn poll_event(&mut self) -> nb::Result<TransferEvent, TransferError>;
}

/// Companion side of the link
pub trait Inbox: Send {
    /// Take the next received file
    fn pop(&mut self) -> Option<InboundFile>;

    /// Report the outcome for `name` back to the device
    fn report(&mut self, name: &str, state: DeliveryState) -> Result<(), TransferError>;
}

#[derive(Debug, Default)]
struct LinkState {
    queue: VecDeque<InboundFile>,
    events: VecDeque<TransferEvent>,
    closed: bool,
}

/// In-process link shared by the device loop and the companion
///
/// File contents are read at enqueue time. Queuing a name that is still
/// waiting replaces the queued copy instead of adding a second one.
#[derive(Debug, Clone, Default)]
pub struct LocalLink {
    state: Arc<Mutex<LinkState>>,
}

impl LocalLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Files waiting for the companion
    pub fn queued(&self) -> Vec<String> {
        self.lock().queue.iter().map(|f| f.name.clone()).collect()
    }

    pub fn pending_events(&self) -> usize {
        self.lock().events.len()
    }

    /// Refuse further transfers; queued files stay retrievable
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Outbox for LocalLink {
    fn enqueue(&mut self, name: &str, path: &Path) -> Result<Enqueued, TransferError> {
        let bytes = fs::read(path).map_err(|e| TransferError::Enqueue {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let mut state = self.lock();
        if state.closed {
            return Err(TransferError::Closed);
        }

        let file = InboundFile {
            name: name.to_string(),
            bytes,
        };
        match state.queue.iter_mut().find(|f| f.name == name) {
            Some(queued) => {
                debug!("{} already queued, replacing", name);
                *queued = file;
                Ok(Enqueued::Replaced)
            }
            None => {
                state.queue.push_back(file);
                state
                    .events
                    .push_back(TransferEvent::new(name, DeliveryState::Pending));
                Ok(Enqueued::New)
            }
        }
    }

    fn poll_event(&mut self) -> nb::Result<TransferEvent, TransferError> {
        self.lock().events.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl Inbox for LocalLink {
    fn pop(&mut self) -> Option<InboundFile> {
        let mut state = self.lock();
        let file = state.queue.pop_front()?;
        state
            .events
            .push_back(TransferEvent::new(file.name.clone(), DeliveryState::Transferring));
        Some(file)
    }

    fn report(&mut self, name: &str, state: DeliveryState) -> Result<(), TransferError> {
        let mut link = self.lock();
        if link.closed {
            return Err(TransferError::Closed);
        }
        link.events.push_back(TransferEvent::new(name, state));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn drain(link: &mut LocalLink) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        while let Ok(event) = link.poll_event() {
            events.push(event);
        }
        events
    }

    #[test]
    fn transitions_are_checked() {
        use TransferState::*;
        assert_eq!(Pending.transition("a", InFlight), Ok(InFlight));
        assert_eq!(InFlight.transition("a", Pending), Ok(Pending));
        assert_eq!(InFlight.transition("a", Acknowledged), Ok(Acknowledged));

        assert_eq!(
            Pending.transition("a", Acknowledged),
            Err(TransferError::IllegalTransition {
                name: "a".into(),
                from: Pending,
                to: Acknowledged
            })
        );
        for to in [Pending, InFlight, Acknowledged] {
            assert!(!Acknowledged.can_transition(to));
        }
    }

    #[test]
    fn round_trip_reports_every_stage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heartrate_20240101-120000.log.csv");
        fs::write(&path, "timestamp;sensor;data\n").unwrap();

        let mut device = LocalLink::new();
        let mut companion = device.clone();
        device.enqueue("heartrate_20240101-120000.log.csv", &path).unwrap();

        let file = companion.pop().unwrap();
        assert_eq!(file.bytes, b"timestamp;sensor;data\n");
        companion.report(&file.name, DeliveryState::Transferred).unwrap();

        let states: Vec<DeliveryState> = drain(&mut device).into_iter().map(|e| e.state).collect();
        assert_eq!(
            states,
            vec![
                DeliveryState::Pending,
                DeliveryState::Transferring,
                DeliveryState::Transferred
            ]
        );
    }

    #[test]
    fn requeue_replaces_waiting_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log.csv");
        fs::write(&path, "one").unwrap();

        let mut link = LocalLink::new();
        assert_eq!(link.enqueue("a.log.csv", &path), Ok(Enqueued::New));
        fs::write(&path, "two").unwrap();
        assert_eq!(link.enqueue("a.log.csv", &path), Ok(Enqueued::Replaced));

        assert_eq!(link.queued(), vec!["a.log.csv".to_string()]);
        assert_eq!(link.pending_events(), 1);
        assert_eq!(link.pop().unwrap().bytes, b"two");
    }

    #[test]
    fn missing_file_is_an_enqueue_error() {
        let dir = TempDir::new().unwrap();
        let mut link = LocalLink::new();
        let err = link.enqueue("gone", &dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, TransferError::Enqueue { ref name, .. } if name == "gone"));
        assert!(link.queued().is_empty());
    }

    #[test]
    fn closed_link_refuses_transfers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a");
        fs::write(&path, "x").unwrap();

        let mut link = LocalLink::new();
        link.close();
        assert_eq!(link.enqueue("a", &path), Err(TransferError::Closed));
        assert_eq!(link.report("a", DeliveryState::Error), Err(TransferError::Closed));
    }
}
