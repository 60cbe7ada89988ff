//! Core request execution: exchanges, outcomes, worker tasks and the controller.

pub mod buffer;
pub mod controller;
pub mod error;
pub mod exchange;
pub mod listener;
pub mod metrics;
pub mod outcome;
pub mod state;
pub mod task;
pub mod transport;
pub mod worker_pool;
pub mod worker_task;

pub use buffer::{BoundedBuffer, BufferWriter};
pub use controller::Controller;
pub use error::{AppResult, CapacityExceeded, ControllerError, ExchangeError, TaskError};
pub use exchange::Exchange;
pub use listener::{DefaultListener, Listener};
pub use metrics::{AsyncTaskSample, FacadeMetrics, InMemoryMetrics, MetricsSink, NoopMetrics};
pub use outcome::{Outcome, OutcomeCell};
pub use state::ExchangeState;
pub use task::{AsyncTask, ComputeTask};
pub use transport::{Transport, TransportResponse};
pub use worker_pool::{PoolKind, PoolStats};
pub use worker_task::WorkerTask;
