//! Debounced recomputation and last-request-wins execution tracking.
//!
//! Both types take the current time as an argument instead of reading a clock, so the
//! engine stays synchronous and the UI binding decides how to drive them.

use std::time::{Duration, Instant};

use tracing::debug;

/// Identifies one scheduled recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecomputeTicket(u64);

#[derive(Debug)]
pub struct RecomputeDebouncer {
    delay: Duration,
    next_ticket: u64,
    pending: Option<(RecomputeTicket, Instant)>,
}

impl RecomputeDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_ticket: 0,
            pending: None,
        }
    }

    /// Schedules a recomputation `delay` after `now`, superseding any pending one.
    pub fn schedule(&mut self, now: Instant) -> RecomputeTicket {
        self.next_ticket += 1;
        let ticket = RecomputeTicket(self.next_ticket);
        if let Some((previous, _)) = self.pending.replace((ticket, now + self.delay)) {
            debug!(?previous, ?ticket, "recompute rescheduled");
        }
        ticket
    }

    pub fn cancel(&mut self) -> Option<RecomputeTicket> {
        self.pending.take().map(|(ticket, _)| ticket)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the pending ticket once its deadline has passed. A ticket fires at most once.
    pub fn poll(&mut self, now: Instant) -> Option<RecomputeTicket> {
        match self.pending {
            Some((ticket, deadline)) if now >= deadline => {
                self.pending = None;
                Some(ticket)
            }
            _ => None,
        }
    }
}

/// Identifies one execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestId(u64);

/// Tracks the latest execution request; results of earlier ones are stale.
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    latest: u64,
    in_flight: bool,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) -> RequestId {
        self.latest += 1;
        self.in_flight = true;
        RequestId(self.latest)
    }

    pub fn is_current(&self, id: RequestId) -> bool {
        id.0 == self.latest
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Completes `id`. Returns `false` when a newer request has started since.
    pub fn finish(&mut self, id: RequestId) -> bool {
        if !self.is_current(id) {
            debug!(request = id.0, latest = self.latest, "stale execution result dropped");
            return false;
        }
        self.in_flight = false;
        true
    }
}
