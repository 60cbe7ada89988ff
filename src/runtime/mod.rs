//! Runtime adapters: the async I/O executor and the deadline watchdog.

pub mod io_executor;
pub mod watchdog;

pub use io_executor::{build_io_runtime, IoExecutor};
pub use watchdog::DeadlineWatchdog;
