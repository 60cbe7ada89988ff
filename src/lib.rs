//! # Prometheus Exchange
//!
//! A bounded request-execution core for HTTP servers.
//!
//! Every accepted request becomes an [`Exchange`](core::Exchange): a
//! per-request context with a deadline, bounded request/response buffers
//! and a single terminal outcome. Handler code is a
//! [`ComputeTask`](core::ComputeTask) that the [`Controller`](core::Controller)
//! runs on one of two bounded worker pools. Handlers may delegate async I/O
//! through [`Exchange::run_async_task`](core::Exchange::run_async_task),
//! which is joined against whatever is left of the request's budget.
//!
//! ## Core Problem Solved
//!
//! - **Bounded concurrency**: a saturated pool rejects work immediately
//!   instead of queueing it without limit
//! - **End-to-end deadlines**: time spent queued counts against the budget,
//!   and async steps are cancelled once it is gone
//! - **Bounded memory**: request and response bodies live in fixed-capacity
//!   buffers; overflow becomes an outcome, not an allocation
//! - **Exactly one response**: whatever the handler does, its exchange is
//!   dispatched to the [`Listener`](core::Listener) exactly once
//!
//! ## Outcomes
//!
//! | Outcome                   | Default response |
//! |---------------------------|------------------|
//! | `Done`                    | handler's status and body |
//! | `Timeout`                 | 502 |
//! | `Exception`               | 500 |
//! | `RequestBufferOverflow`   | 400 |
//! | `ResponseBufferOverflow`  | 502 |
//! | `Rejected`                | 429 |
//! | `ConnectionClosed`        | connection closed, nothing sent |
//! | `Interrupted` / unknown   | 500 |
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_exchange::builders::{build_controller, ExchangeFactory};
//! use prometheus_exchange::config::ServerConfig;
//! use prometheus_exchange::core::{Exchange, FacadeMetrics, TaskError, WorkerTask};
//!
//! let cfg = ServerConfig::from_env()?;
//! let metrics = Arc::new(FacadeMetrics);
//! let controller = build_controller(&cfg, metrics.clone())?;
//! let factory = ExchangeFactory::for_controller(cfg.exchange.clone(), &controller, metrics)?;
//!
//! let exchange = factory.create_named(transport, "lookup")?;
//! let task = WorkerTask::new(exchange, |ex: &mut Exchange| -> Result<(), TaskError> {
//!     let row = ex.run_async_task("db", || async { fetch_row().await })?;
//!     ex.set_content_type("application/json").map_err(anyhow::Error::from)?;
//!     ex.write_response(&row)?;
//!     Ok(())
//! });
//! controller.schedule_or_reject(task, false);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core request execution: exchanges, outcomes, worker tasks and the controller.
pub mod core;
/// Configuration models for the controller and exchanges.
pub mod config;
/// Builders to construct the controller and exchanges from configuration.
pub mod builders;
/// Infrastructure adapters for the transport seam.
pub mod infra;
/// Runtime adapters: async I/O executor and deadline watchdog.
pub mod runtime;
/// Shared utilities.
pub mod util;
