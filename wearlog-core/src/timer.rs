//! Single-deadline timers for the cooperative device loop
//!
//! The watchdog and the backup scanner both reschedule themselves after every
//! tick. A [`Timer`] owns at most one deadline: arming an armed timer replaces
//! the deadline in one step, so two overlapping timers can never exist.
//!
//! ```text
//!            arm(now)                     fire_if_due(now >= deadline)
//! Disarmed ───────────→ Armed{deadline} ───────────────────────────────→ Disarmed
//!     ↑                   │    ↑  │
//!     └─── disarm() ──────┘    └──┘ arm(now): deadline replaced
//! ```
//!
//! A fired timer is one-shot; the owner decides whether to re-arm it.

use crate::time::Timestamp;

/// Armed/disarmed state of a [`Timer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Disarmed,
    Armed { deadline: Timestamp },
}

#[derive(Debug, Clone)]
pub struct Timer {
    period_ms: u64,
    state: TimerState,
}

impl Timer {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            state: TimerState::Disarmed,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, TimerState::Armed { .. })
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        match self.state {
            TimerState::Armed { deadline } => Some(deadline),
            TimerState::Disarmed => None,
        }
    }

    /// Arm for one period from `now`, returning the replaced deadline if any
    pub fn arm(&mut self, now: Timestamp) -> Option<Timestamp> {
        let previous = self.deadline();
        self.state = TimerState::Armed {
            deadline: now.saturating_add(self.period_ms),
        };
        previous
    }

    /// Disarm; returns whether the timer was armed
    pub fn disarm(&mut self) -> bool {
        let was_armed = self.is_armed();
        self.state = TimerState::Disarmed;
        was_armed
    }

    /// Consume the deadline if it has passed
    pub fn fire_if_due(&mut self, now: Timestamp) -> bool {
        match self.state {
            TimerState::Armed { deadline } if now >= deadline => {
                self.state = TimerState::Disarmed;
                true
            }
            _ => false,
        }
    }
}
