// Reconciliation throttle: coalesce mutation bursts into one pass per interval.

use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_millis(100);

/// Tracks when the next pass may run. At most one pass is ever pending.
#[derive(Debug, Clone)]
pub struct ReconcileThrottle {
    interval: Duration,
    last_run: Option<Instant>,
    pending_at: Option<Instant>,
}

impl Default for ReconcileThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_RECONCILE_INTERVAL)
    }
}

impl ReconcileThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_run: None, pending_at: None }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Note a relevant mutation. Schedules a pass unless one is already pending.
    pub fn notify_at(&mut self, now: Instant) {
        if self.pending_at.is_some() {
            return;
        }
        let earliest = self.last_run.map_or(now, |last| last + self.interval);
        self.pending_at = Some(earliest.max(now));
    }

    /// When the pending pass should run.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending_at
    }

    pub fn is_pending(&self) -> bool {
        self.pending_at.is_some()
    }

    /// Claim the pending pass if it is due.
    pub fn take_due_at(&mut self, now: Instant) -> bool {
        match self.pending_at {
            Some(at) if now >= at => {
                self.pending_at = None;
                true
            }
            _ => false,
        }
    }

    /// Put a claimed pass back, one interval out, when it could not run.
    pub fn defer_at(&mut self, now: Instant) {
        self.pending_at = Some(now + self.interval);
    }

    pub fn mark_ran_at(&mut self, now: Instant) {
        self.last_run = Some(now);
    }
}
