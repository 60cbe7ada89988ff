//! The two shapes of handler work: synchronous compute steps and async steps.

use std::future::Future;

use async_trait::async_trait;

use crate::core::{Exchange, TaskError};

/// Synchronous handler logic bound to one exchange.
///
/// A compute task runs to completion on a worker thread. It may call
/// [`Exchange::run_async_task`] any number of times; each call blocks the
/// worker until the async step resolves or the exchange deadline passes.
///
/// # Example
///
/// ```rust,ignore
/// use prometheus_exchange::core::{ComputeTask, Exchange, TaskError};
///
/// struct Echo;
///
/// impl ComputeTask for Echo {
///     fn compute(&mut self, exchange: &mut Exchange) -> Result<(), TaskError> {
///         let body = exchange.request_body().to_vec();
///         exchange.write_response(&body)?;
///         Ok(())
///     }
/// }
/// ```
pub trait ComputeTask: Send + 'static {
    /// Run the handler against `exchange`.
    ///
    /// Returning `Ok(())` completes the exchange as `Done` unless another
    /// outcome was set first.
    ///
    /// # Errors
    ///
    /// Any [`TaskError`]; the worker task maps it to an outcome.
    fn compute(&mut self, exchange: &mut Exchange) -> Result<(), TaskError>;
}

impl<F> ComputeTask for F
where
    F: FnMut(&mut Exchange) -> Result<(), TaskError> + Send + 'static,
{
    fn compute(&mut self, exchange: &mut Exchange) -> Result<(), TaskError> {
        self(exchange)
    }
}

/// A delegated unit of work that resolves on the I/O executor.
///
/// The future is spawned onto the exchange's I/O runtime and joined against
/// the remaining budget. If the budget runs out first the spawned future is
/// cancelled.
#[async_trait]
pub trait AsyncTask<T>: Send + 'static
where
    T: Send + 'static,
{
    /// Produce the result.
    async fn run(self) -> Result<T, TaskError>;
}

#[async_trait]
impl<F, Fut, T> AsyncTask<T> for F
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    T: Send + 'static,
{
    async fn run(self) -> Result<T, TaskError> {
        self().await
    }
}
