//! Terminal outcomes of an exchange and the atomic cell that holds them.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// How an exchange finished.
///
/// `Running` is the only non-terminal value. Transitions are one-way: once a
/// terminal outcome is stored it is never replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Outcome {
    /// Still executing.
    Running = 0,
    /// Handler completed normally.
    Done = 1,
    /// Deadline exhausted.
    Timeout = 2,
    /// Execution unit interrupted or cancelled.
    Interrupted = 3,
    /// Unhandled handler failure; cause retained on the exchange.
    Exception = 4,
    /// Client disconnected.
    ConnectionClosed = 5,
    /// Pool could not admit the work.
    Rejected = 6,
    /// Request payload exceeded the request buffer.
    RequestBufferOverflow = 7,
    /// Response payload exceeded the response buffer.
    ResponseBufferOverflow = 8,
}

impl Outcome {
    /// Every terminal outcome, in declaration order.
    pub const TERMINAL: [Self; 8] = [
        Self::Done,
        Self::Timeout,
        Self::Interrupted,
        Self::Exception,
        Self::ConnectionClosed,
        Self::Rejected,
        Self::RequestBufferOverflow,
        Self::ResponseBufferOverflow,
    ];

    /// True for every value except `Running`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
            Self::Exception => "exception",
            Self::ConnectionClosed => "connection_closed",
            Self::Rejected => "rejected",
            Self::RequestBufferOverflow => "request_buffer_overflow",
            Self::ResponseBufferOverflow => "response_buffer_overflow",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Done,
            2 => Self::Timeout,
            3 => Self::Interrupted,
            4 => Self::Exception,
            5 => Self::ConnectionClosed,
            6 => Self::Rejected,
            7 => Self::RequestBufferOverflow,
            8 => Self::ResponseBufferOverflow,
            _ => Self::Running,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-writer-wins outcome storage.
///
/// The first successful `try_complete` fixes the outcome; later writers,
/// including a concurrent watchdog, observe the stored value and back off.
#[derive(Debug, Default)]
pub struct OutcomeCell {
    raw: AtomicU8,
}

impl OutcomeCell {
    /// A cell in the `Running` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            raw: AtomicU8::new(Outcome::Running as u8),
        }
    }

    /// Current outcome.
    #[must_use]
    pub fn load(&self) -> Outcome {
        Outcome::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// True once any terminal outcome is stored.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.load().is_terminal()
    }

    /// Store `outcome` if the cell is still `Running`.
    ///
    /// Returns `true` if this call won. Passing `Outcome::Running` is a no-op.
    pub fn try_complete(&self, outcome: Outcome) -> bool {
        if !outcome.is_terminal() {
            return false;
        }
        self.raw
            .compare_exchange(
                Outcome::Running as u8,
                outcome as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
