// Debounced persistence as an explicit state machine.
//
// Idle -> Scheduled{deadline} -> InFlight -> Idle. A request while Scheduled
// pushes the deadline out; a request while InFlight schedules a follow-up
// save once the current one completes.

use std::time::Duration;

use tokio::time::Instant;

/// Default quiet window before a scheduled save runs.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistState {
    Idle,
    Scheduled { deadline: Instant },
    InFlight { rescheduled: bool },
}

#[derive(Debug, Clone)]
pub struct PersistScheduler {
    debounce: Duration,
    state: PersistState,
}

impl Default for PersistScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_PERSIST_DEBOUNCE)
    }
}

impl PersistScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce, state: PersistState::Idle }
    }

    pub fn state(&self) -> PersistState {
        self.state
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Ask for a save; the last request inside the quiet window wins.
    pub fn request_at(&mut self, now: Instant) {
        self.state = match self.state {
            PersistState::Idle | PersistState::Scheduled { .. } => {
                PersistState::Scheduled { deadline: now + self.debounce }
            }
            PersistState::InFlight { .. } => PersistState::InFlight { rescheduled: true },
        };
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            PersistState::Scheduled { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Whether a save is waiting, due or not.
    pub fn is_pending(&self) -> bool {
        !matches!(self.state, PersistState::Idle)
    }

    /// Move a due save to InFlight. Returns whether the caller should write.
    pub fn begin_due_at(&mut self, now: Instant) -> bool {
        match self.state {
            PersistState::Scheduled { deadline } if now >= deadline => {
                self.state = PersistState::InFlight { rescheduled: false };
                true
            }
            _ => false,
        }
    }

    /// Start a save immediately, whatever the deadline. Returns false if a
    /// save is already in flight.
    pub fn begin_now(&mut self) -> bool {
        if matches!(self.state, PersistState::InFlight { .. }) {
            return false;
        }
        self.state = PersistState::InFlight { rescheduled: false };
        true
    }

    /// Finish the in-flight save, failed or not.
    pub fn complete_at(&mut self, now: Instant) {
        self.state = match self.state {
            PersistState::InFlight { rescheduled: true } => {
                PersistState::Scheduled { deadline: now + self.debounce }
            }
            PersistState::InFlight { rescheduled: false } => PersistState::Idle,
            other => other,
        };
    }

    /// Finish a failed save: try again after another quiet window.
    pub fn fail_at(&mut self, now: Instant) {
        if let PersistState::InFlight { .. } = self.state {
            self.state = PersistState::Scheduled { deadline: now + self.debounce };
        }
    }

    /// Drop any scheduled save.
    pub fn cancel(&mut self) {
        if let PersistState::Scheduled { .. } = self.state {
            self.state = PersistState::Idle;
        }
    }
}
