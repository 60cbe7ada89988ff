//! Error types for exchange execution and scheduling.

use std::io;

use thiserror::Error;

/// A write would have pushed a bounded buffer past its fixed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer capacity exceeded: requested {requested} bytes, {available} available")]
pub struct CapacityExceeded {
    /// Bytes the rejected write tried to append.
    pub requested: usize,
    /// Bytes that were still free when the write was attempted.
    pub available: usize,
}

/// Errors returned by compute and async tasks.
///
/// Every variant is converted into exactly one outcome at the worker task
/// boundary; none of them escape to the caller of `Controller::schedule`.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Force-terminate signal. The outcome has already been set by whoever
    /// raised it; this only unwinds the handler back to the dispatch point.
    #[error("exchange terminated")]
    Terminated,
    /// The exchange deadline was exceeded.
    #[error("deadline exceeded")]
    Timeout,
    /// The executing unit was interrupted or cancelled.
    #[error("execution interrupted")]
    Interrupted,
    /// A bounded buffer rejected a write.
    #[error(transparent)]
    Overflow(#[from] CapacityExceeded),
    /// Any other handler failure; the cause is retained on the exchange.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl TaskError {
    /// True for the force-terminate signal.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl From<io::Error> for TaskError {
    fn from(err: io::Error) -> Self {
        if let Some(overflow) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<CapacityExceeded>())
        {
            return Self::Overflow(*overflow);
        }
        match err.kind() {
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::Interrupted => Self::Interrupted,
            _ => Self::Failed(err.into()),
        }
    }
}

/// Errors raised while building or configuring an exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Timeout budget must be strictly positive.
    #[error("timeout budget must be greater than zero")]
    InvalidTimeout,
    /// `on_completion` may only be registered once per exchange.
    #[error("completion hook already set")]
    CompletionHookAlreadySet,
}

/// Errors produced by the controller and its worker pools.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker thread or the I/O runtime could not be started.
    #[error("failed to start execution resources: {0}")]
    Io(#[from] io::Error),
    /// The controller has been closed.
    #[error("controller closed")]
    Closed,
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
