//! Shared, atomically updated part of an exchange.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::core::outcome::{Outcome, OutcomeCell};

/// Identity, deadline and outcome of one exchange.
///
/// Everything here may be touched from threads other than the one running
/// the exchange (watchdogs, transport disconnect detection), so every field
/// is either immutable or atomic. The remaining budget is recomputed from
/// the clock on every call and never cached.
#[derive(Debug)]
pub struct ExchangeState {
    id: u64,
    start: Instant,
    timeout_nanos: AtomicU64,
    outcome: OutcomeCell,
}

impl ExchangeState {
    pub(crate) fn new(id: u64, start: Instant, timeout: Duration) -> Self {
        Self {
            id,
            start,
            timeout_nanos: AtomicU64::new(duration_to_nanos(timeout)),
            outcome: OutcomeCell::new(),
        }
    }

    /// Exchange identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Deadline anchor taken from the transport.
    #[must_use]
    pub const fn start_time(&self) -> Instant {
        self.start
    }

    /// Total budget measured from the start time.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_nanos(self.timeout_nanos.load(Ordering::Acquire))
    }

    /// Replace the total budget, measured from the start time.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_nanos
            .store(duration_to_nanos(timeout), Ordering::Release);
    }

    /// Absolute deadline implied by the current budget.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.start + self.timeout()
    }

    /// `timeout - (now - start)`, saturating at zero.
    #[must_use]
    pub fn remaining_budget(&self) -> Duration {
        self.timeout().saturating_sub(self.start.elapsed())
    }

    /// True when less than one nanosecond of budget is left.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.remaining_budget().is_zero()
    }

    /// Current outcome.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.outcome.load()
    }

    /// True once any terminal outcome is set.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.outcome.is_done()
    }

    /// Set `outcome` if the exchange is still running. Returns whether this
    /// call set it.
    pub fn try_complete(&self, outcome: Outcome) -> bool {
        self.outcome.try_complete(outcome)
    }

    /// Mark the exchange timed out.
    pub fn mark_timeout(&self) -> bool {
        self.try_complete(Outcome::Timeout)
    }

    /// Mark the client connection as gone.
    pub fn mark_connection_closed(&self) -> bool {
        self.try_complete(Outcome::ConnectionClosed)
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
