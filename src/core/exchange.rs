//! Per-request execution context.
//!
//! An [`Exchange`] carries everything one request needs while its handler
//! runs: identity, deadline, bounded request/response buffers, the outcome
//! cell, the completion hook and the transport. It is owned by exactly one
//! worker task at a time; only its [`ExchangeState`] is shared with other
//! threads.
//!
//! # Deadline
//!
//! The budget is anchored at the transport's start time, so time spent
//! queued counts against it. [`Exchange::run_async_task`] joins async work
//! against whatever budget is left at the moment of the call; once the
//! budget is gone the exchange is marked `Timeout` and the caller receives
//! [`TaskError::Terminated`], which should be propagated with `?` straight
//! back to the worker task.

use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use futures::FutureExt;
use http::header::{InvalidHeaderValue, CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use tracing::{debug, warn};

use crate::config::ExchangeConfig;
use crate::core::buffer::{BoundedBuffer, BufferWriter};
use crate::core::listener::{DefaultListener, Listener};
use crate::core::metrics::{MetricsSink, NoopMetrics};
use crate::core::state::ExchangeState;
use crate::core::task::AsyncTask;
use crate::core::transport::{Transport, TransportResponse};
use crate::core::{CapacityExceeded, ExchangeError, Outcome, TaskError};
use crate::runtime::IoExecutor;
use crate::util::{next_exchange_id, panic_message};

type CompletionHook = Box<dyn FnOnce(&Exchange) + Send>;

/// Per-request execution context.
pub struct Exchange {
    state: Arc<ExchangeState>,
    handler_name: String,
    transport: Box<dyn Transport>,
    request: BoundedBuffer,
    response: BoundedBuffer,
    status: StatusCode,
    headers: HeaderMap,
    failure: Option<anyhow::Error>,
    on_completion: Option<CompletionHook>,
    listener: Arc<dyn Listener>,
    metrics: Arc<dyn MetricsSink>,
    io: Option<IoExecutor>,
    dispatched: bool,
}

impl Exchange {
    /// Create an exchange for a request accepted by `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::InvalidTimeout`] if the configured timeout is zero.
    pub fn new<T>(transport: T, config: &ExchangeConfig) -> Result<Self, ExchangeError>
    where
        T: Transport + 'static,
    {
        Self::with_transport(Box::new(transport), config)
    }

    /// Same as [`Self::new`] for an already boxed transport.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::InvalidTimeout`] if the configured timeout is zero.
    pub fn with_transport(
        transport: Box<dyn Transport>,
        config: &ExchangeConfig,
    ) -> Result<Self, ExchangeError> {
        let timeout = config.timeout();
        if timeout.is_zero() {
            return Err(ExchangeError::InvalidTimeout);
        }
        let state = ExchangeState::new(next_exchange_id(), transport.start_time(), timeout);
        Ok(Self {
            state: Arc::new(state),
            handler_name: "anonymous".to_owned(),
            transport,
            request: BoundedBuffer::new(config.request_buffer_capacity),
            response: BoundedBuffer::new(config.response_buffer_capacity),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            failure: None,
            on_completion: None,
            listener: Arc::new(DefaultListener),
            metrics: Arc::new(NoopMetrics),
            io: None,
            dispatched: false,
        })
    }

    /// Label used to tag per-handler metrics.
    #[must_use]
    pub fn with_handler_name(mut self, name: impl Into<String>) -> Self {
        self.handler_name = name.into();
        self
    }

    /// Listener invoked on dispatch.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listener = listener;
        self
    }

    /// Metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Runtime async tasks are spawned on.
    #[must_use]
    pub fn with_io(mut self, io: IoExecutor) -> Self {
        self.io = Some(io);
        self
    }

    pub(crate) fn attach_io(&mut self, io: &IoExecutor) {
        if self.io.is_none() {
            self.io = Some(io.clone());
        }
    }

    pub(crate) fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    // ---------------------------------------------------------------------
    // Identity and deadline
    // ---------------------------------------------------------------------

    /// Exchange identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.state.id()
    }

    /// Handler label.
    #[must_use]
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    /// Shared state, for watchdogs and disconnect detection.
    #[must_use]
    pub const fn state(&self) -> &Arc<ExchangeState> {
        &self.state
    }

    /// Deadline anchor.
    #[must_use]
    pub fn start_time(&self) -> Instant {
        self.state.start_time()
    }

    /// Total budget measured from the start time.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.state.timeout()
    }

    /// Extend or shorten the budget mid-flight.
    pub fn set_timeout(&self, timeout: Duration) {
        self.state.set_timeout(timeout);
    }

    /// Budget left right now.
    #[must_use]
    pub fn remaining_budget(&self) -> Duration {
        self.state.remaining_budget()
    }

    /// True when the budget is exhausted.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.state.is_timeout()
    }

    // ---------------------------------------------------------------------
    // Outcome
    // ---------------------------------------------------------------------

    /// Current outcome.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.state.outcome()
    }

    /// True once any terminal outcome is set.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Error captured with the `Exception` outcome.
    #[must_use]
    pub fn failure_cause(&self) -> Option<&anyhow::Error> {
        self.failure.as_ref()
    }

    /// Mark the exchange `Done`.
    pub fn complete(&self) -> bool {
        self.state.try_complete(Outcome::Done)
    }

    /// Mark the exchange `Timeout`.
    pub fn complete_with_timeout(&self) -> bool {
        self.state.try_complete(Outcome::Timeout)
    }

    /// Mark the exchange `Interrupted`.
    pub fn complete_with_interrupted(&self) -> bool {
        self.state.try_complete(Outcome::Interrupted)
    }

    /// Mark the exchange `Rejected`.
    pub fn complete_with_rejected(&self) -> bool {
        self.state.try_complete(Outcome::Rejected)
    }

    /// Mark the exchange `ConnectionClosed`.
    pub fn complete_with_connection_closed(&self) -> bool {
        self.state.try_complete(Outcome::ConnectionClosed)
    }

    /// Mark a buffer overflow on the request or response side.
    pub fn complete_with_buffer_overflow(&self, request_side: bool) -> bool {
        self.state.try_complete(if request_side {
            Outcome::RequestBufferOverflow
        } else {
            Outcome::ResponseBufferOverflow
        })
    }

    /// Classify `error` and complete with the matching outcome.
    ///
    /// Timeouts map to `Timeout`, interruptions to `Interrupted`, everything
    /// else to `Exception` with the error kept as the failure cause.
    pub fn complete_with_fail(&mut self, error: TaskError) -> bool {
        let cause = match error {
            TaskError::Timeout => return self.complete_with_timeout(),
            TaskError::Interrupted => return self.complete_with_interrupted(),
            TaskError::Terminated => anyhow::anyhow!("exchange terminated without an outcome"),
            TaskError::Overflow(overflow) => anyhow::Error::new(overflow),
            TaskError::Failed(cause) => cause,
        };
        let won = self.state.try_complete(Outcome::Exception);
        if won {
            self.failure = Some(cause);
        }
        won
    }

    // ---------------------------------------------------------------------
    // Request side
    // ---------------------------------------------------------------------

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        self.transport.method()
    }

    /// Request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        self.transport.uri()
    }

    /// Request headers.
    #[must_use]
    pub fn request_headers(&self) -> &HeaderMap {
        self.transport.headers()
    }

    /// Request cookie by name.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.transport.cookie(name)
    }

    /// Query parameter by name.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.transport.query_param(name)
    }

    /// Whether the client accepts a compressed response.
    #[must_use]
    pub fn accepts_compression(&self) -> bool {
        self.transport.accepts_compression()
    }

    /// Append inbound payload to the request buffer. On overflow the
    /// exchange is marked `RequestBufferOverflow`.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`] when the payload does not fit.
    pub fn load_request_body(&mut self, data: &[u8]) -> Result<(), CapacityExceeded> {
        self.request.write(data).inspect_err(|_| {
            self.state.try_complete(Outcome::RequestBufferOverflow);
        })
    }

    /// Bytes loaded into the request buffer.
    #[must_use]
    pub fn request_body(&self) -> &[u8] {
        self.request.as_bytes()
    }

    /// Request buffer.
    #[must_use]
    pub const fn request_buffer(&self) -> &BoundedBuffer {
        &self.request
    }

    // ---------------------------------------------------------------------
    // Response side
    // ---------------------------------------------------------------------

    /// Status sent when the handler completes normally.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the status sent on normal completion.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Response headers set so far.
    #[must_use]
    pub const fn response_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Set a response header, replacing earlier values.
    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Set the response content type.
    ///
    /// # Errors
    ///
    /// Returns an error if `content_type` is not a valid header value.
    pub fn set_content_type(&mut self, content_type: &str) -> Result<(), InvalidHeaderValue> {
        let value = HeaderValue::from_str(content_type)?;
        self.headers.insert(CONTENT_TYPE, value);
        Ok(())
    }

    /// Add a `set-cookie` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie does not form a valid header value.
    pub fn add_cookie(&mut self, name: &str, value: &str) -> Result<(), InvalidHeaderValue> {
        let value = HeaderValue::from_str(&format!("{name}={value}"))?;
        self.headers.append(SET_COOKIE, value);
        Ok(())
    }

    /// Append to the response buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`] when the data does not fit; nothing is
    /// written in that case.
    pub fn write_response(&mut self, data: &[u8]) -> Result<(), CapacityExceeded> {
        self.response.write(data)
    }

    /// Streaming writer over the response buffer.
    pub fn response_writer(&mut self) -> BufferWriter<'_> {
        self.response.writer()
    }

    /// Response buffer.
    #[must_use]
    pub const fn response_buffer(&self) -> &BoundedBuffer {
        &self.response
    }

    /// Mutable response buffer.
    pub fn response_buffer_mut(&mut self) -> &mut BoundedBuffer {
        &mut self.response
    }

    /// Send the handler's status, headers and buffered body. An empty
    /// buffer is sent as "no content".
    pub fn send_response(&mut self) {
        let body = (!self.response.is_empty()).then(|| self.response.as_bytes().to_vec());
        let response = TransportResponse {
            status: self.status,
            headers: std::mem::take(&mut self.headers),
            body,
        };
        self.transport.send(response);
    }

    /// Send a bare status with no body. Handler headers and any partially
    /// written body are discarded.
    pub fn send_status(&mut self, status: StatusCode) {
        self.transport.send(TransportResponse {
            status,
            headers: HeaderMap::new(),
            body: None,
        });
    }

    /// Drop the client connection.
    pub fn close_connection(&mut self) {
        self.transport.close_connection();
    }

    /// Direct access to the transport.
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    // ---------------------------------------------------------------------
    // Async steps and completion
    // ---------------------------------------------------------------------

    /// Register the callback fired after the listener runs.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::CompletionHookAlreadySet`] on a second call.
    pub fn set_on_completion<F>(&mut self, hook: F) -> Result<(), ExchangeError>
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        if self.on_completion.is_some() {
            return Err(ExchangeError::CompletionHookAlreadySet);
        }
        self.on_completion = Some(Box::new(hook));
        Ok(())
    }

    /// Run `task` on the I/O executor and block until it resolves or the
    /// remaining budget elapses.
    ///
    /// The elapsed time is recorded under `label` whatever happens.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Terminated`] after setting the outcome when the
    /// budget elapses, the exchange was completed concurrently, or the task
    /// fails. Propagate it with `?`.
    pub fn run_async_task<T, A>(&mut self, label: &str, task: A) -> Result<T, TaskError>
    where
        T: Send + 'static,
        A: AsyncTask<T>,
    {
        let started = Instant::now();
        let result = self.join_async_task(label, task);
        let elapsed = started.elapsed();
        self.metrics
            .record_async_task(&self.handler_name, label, elapsed);
        debug!(
            exchange_id = self.id(),
            label,
            elapsed_ms = elapsed.as_millis(),
            outcome = %self.outcome(),
            "async task joined"
        );
        result
    }

    fn join_async_task<T, A>(&mut self, label: &str, task: A) -> Result<T, TaskError>
    where
        T: Send + 'static,
        A: AsyncTask<T>,
    {
        let budget = self.remaining_budget();
        if budget.is_zero() || self.is_done() {
            self.complete_with_timeout();
            return Err(TaskError::Terminated);
        }

        // Only the attached executor: blocking a caller's runtime thread
        // below would starve the joined future.
        let Some(io) = self.io.clone() else {
            self.complete_with_fail(TaskError::Failed(anyhow::anyhow!(
                "no I/O executor attached for async task `{label}`"
            )));
            return Err(TaskError::Terminated);
        };

        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = io.spawn(async move {
            let result = AssertUnwindSafe(task.run()).catch_unwind().await;
            let _ = tx.send(result);
        });

        match rx.recv_timeout(budget) {
            Ok(Ok(Ok(value))) if !self.is_done() => Ok(value),
            Ok(Ok(Ok(_))) => {
                self.complete_with_timeout();
                Err(TaskError::Terminated)
            }
            Ok(Ok(Err(err))) => {
                self.fail_async_task(err);
                Err(TaskError::Terminated)
            }
            Ok(Err(panic)) => {
                self.complete_with_fail(TaskError::Failed(anyhow::anyhow!(
                    "async task `{label}` panicked: {}",
                    panic_message(panic.as_ref())
                )));
                Err(TaskError::Terminated)
            }
            Err(RecvTimeoutError::Timeout) => {
                handle.abort();
                self.complete_with_timeout();
                Err(TaskError::Terminated)
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Dropped without a result: the runtime cancelled it.
                self.complete_with_interrupted();
                Err(TaskError::Terminated)
            }
        }
    }

    fn fail_async_task(&mut self, err: TaskError) {
        match err {
            TaskError::Timeout | TaskError::Terminated => {
                self.complete_with_timeout();
            }
            TaskError::Overflow(_) => {
                self.complete_with_buffer_overflow(false);
            }
            other => {
                self.complete_with_fail(other);
            }
        }
    }

    /// Hand the exchange to its listener and fire the completion hook.
    ///
    /// Only the first call has any effect. Outcomes are inspected in a fixed
    /// order: connection-closed, exception, request overflow, response
    /// overflow, timeout, rejected, done, interrupted, and finally unknown
    /// when no outcome was ever set.
    pub fn dispatch(&mut self) -> Outcome {
        let outcome = self.outcome();
        if self.dispatched {
            warn!(exchange_id = self.id(), outcome = %outcome, "exchange already dispatched");
            return outcome;
        }
        self.dispatched = true;
        self.metrics.record_outcome(&self.handler_name, outcome);

        let listener = Arc::clone(&self.listener);
        match outcome {
            Outcome::ConnectionClosed => listener.on_connection_closed(self),
            Outcome::Exception => listener.on_exception(self),
            Outcome::RequestBufferOverflow => listener.on_request_overflow(self),
            Outcome::ResponseBufferOverflow => listener.on_response_overflow(self),
            Outcome::Timeout => listener.on_timeout(self),
            Outcome::Rejected => listener.on_rejected(self),
            Outcome::Done => listener.on_done(self),
            Outcome::Interrupted => listener.on_interrupted(self),
            Outcome::Running => listener.on_unknown(self),
        }

        if let Some(hook) = self.on_completion.take() {
            hook(&*self);
        }
        debug!(
            exchange_id = self.id(),
            handler = %self.handler_name,
            outcome = %outcome,
            "exchange dispatched"
        );
        outcome
    }

    /// True once `dispatch` has run.
    #[must_use]
    pub const fn is_dispatched(&self) -> bool {
        self.dispatched
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id())
            .field("handler_name", &self.handler_name)
            .field("outcome", &self.outcome())
            .field("remaining_budget", &self.remaining_budget())
            .field("request_len", &self.request.len())
            .field("response_len", &self.response.len())
            .field("dispatched", &self.dispatched)
            .finish_non_exhaustive()
    }
}

impl io::Write for Exchange {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut self.response.writer(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::InMemoryMetrics;
    use crate::infra::InMemoryTransport;
    use crate::runtime::build_io_runtime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(timeout_ms: u64) -> ExchangeConfig {
        ExchangeConfig::new()
            .with_timeout_ms(timeout_ms)
            .with_request_buffer_capacity(16)
            .with_response_buffer_capacity(8)
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let (transport, _probe) = InMemoryTransport::get("/");
        let err = Exchange::new(transport, &config(0)).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidTimeout));
    }

    #[test]
    fn completion_hook_can_only_be_set_once() {
        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000)).unwrap();
        exchange.set_on_completion(|_| {}).unwrap();
        let err = exchange.set_on_completion(|_| {}).unwrap_err();
        assert!(matches!(err, ExchangeError::CompletionHookAlreadySet));
    }

    #[test]
    fn complete_with_fail_classifies_errors() {
        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000)).unwrap();
        assert!(exchange.complete_with_fail(TaskError::Failed(anyhow::anyhow!("db down"))));
        assert_eq!(exchange.outcome(), Outcome::Exception);
        assert_eq!(exchange.failure_cause().unwrap().to_string(), "db down");

        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000)).unwrap();
        exchange.complete_with_fail(TaskError::Timeout);
        assert_eq!(exchange.outcome(), Outcome::Timeout);
        assert!(exchange.failure_cause().is_none());

        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000)).unwrap();
        exchange.complete_with_fail(TaskError::Interrupted);
        assert_eq!(exchange.outcome(), Outcome::Interrupted);
    }

    #[test]
    fn losing_failure_does_not_record_cause() {
        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000)).unwrap();
        exchange.complete_with_timeout();
        assert!(!exchange.complete_with_fail(TaskError::Failed(anyhow::anyhow!("late"))));
        assert_eq!(exchange.outcome(), Outcome::Timeout);
        assert!(exchange.failure_cause().is_none());
    }

    #[test]
    fn request_overflow_marks_outcome() {
        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000)).unwrap();
        exchange.load_request_body(b"0123456789").unwrap();
        assert!(exchange.load_request_body(b"0123456789").is_err());
        assert_eq!(exchange.request_body(), b"0123456789");
        assert_eq!(exchange.outcome(), Outcome::RequestBufferOverflow);
    }

    #[test]
    fn dispatch_runs_listener_and_hook_once() {
        let (transport, probe) = InMemoryTransport::get("/");
        let metrics = Arc::new(InMemoryMetrics::default());
        let mut exchange = Exchange::new(transport, &config(1_000))
            .unwrap()
            .with_metrics(metrics.clone());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        exchange
            .set_on_completion(move |ex| {
                assert!(ex.is_dispatched());
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        exchange.write_response(b"ok").unwrap();
        exchange.complete();
        assert_eq!(exchange.dispatch(), Outcome::Done);
        assert_eq!(exchange.dispatch(), Outcome::Done);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(probe.send_count(), 1);
        assert_eq!(metrics.total_dispatches(), 1);
        let response = probe.response().unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_deref(), Some(&b"ok"[..]));
    }

    #[test]
    fn dispatch_without_outcome_is_unknown() {
        let (transport, probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000)).unwrap();
        assert_eq!(exchange.dispatch(), Outcome::Running);
        assert_eq!(probe.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn async_task_result_is_returned_within_budget() {
        let runtime = build_io_runtime(1).unwrap();
        let (transport, _probe) = InMemoryTransport::get("/");
        let metrics = Arc::new(InMemoryMetrics::default());
        let mut exchange = Exchange::new(transport, &config(1_000))
            .unwrap()
            .with_metrics(metrics.clone())
            .with_io(IoExecutor::new(runtime.handle().clone()));

        let value = exchange
            .run_async_task("answer", || async { Ok::<_, TaskError>(42) })
            .unwrap();
        assert_eq!(value, 42);
        assert!(!exchange.is_done());
        assert_eq!(metrics.async_samples("answer").len(), 1);
    }

    #[test]
    fn async_task_past_budget_times_out_and_terminates() {
        let runtime = build_io_runtime(1).unwrap();
        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(30))
            .unwrap()
            .with_io(IoExecutor::new(runtime.handle().clone()));

        let started = Instant::now();
        let err = exchange
            .run_async_task("slow", || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, TaskError>(())
            })
            .unwrap_err();
        assert!(err.is_terminated());
        assert_eq!(exchange.outcome(), Outcome::Timeout);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn async_task_errors_are_classified() {
        let runtime = build_io_runtime(1).unwrap();
        let io = IoExecutor::new(runtime.handle().clone());

        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000))
            .unwrap()
            .with_io(io.clone());
        let err = exchange
            .run_async_task("fill", || async {
                Err::<(), _>(TaskError::Overflow(CapacityExceeded {
                    requested: 9,
                    available: 0,
                }))
            })
            .unwrap_err();
        assert!(err.is_terminated());
        assert_eq!(exchange.outcome(), Outcome::ResponseBufferOverflow);

        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000))
            .unwrap()
            .with_io(io.clone());
        let _ = exchange.run_async_task("upstream", || async {
            Err::<(), _>(TaskError::Failed(anyhow::anyhow!("refused")))
        });
        assert_eq!(exchange.outcome(), Outcome::Exception);
        assert_eq!(exchange.failure_cause().unwrap().to_string(), "refused");

        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000))
            .unwrap()
            .with_io(io);
        let _ = exchange.run_async_task("nested", || async { Err::<(), _>(TaskError::Timeout) });
        assert_eq!(exchange.outcome(), Outcome::Timeout);
    }

    #[test]
    fn async_task_panic_becomes_exception() {
        let runtime = build_io_runtime(1).unwrap();
        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000))
            .unwrap()
            .with_io(IoExecutor::new(runtime.handle().clone()));

        let err = exchange
            .run_async_task("explode", || async {
                if true {
                    panic!("upstream exploded");
                }
                Ok::<(), TaskError>(())
            })
            .unwrap_err();
        assert!(err.is_terminated());
        assert_eq!(exchange.outcome(), Outcome::Exception);
        assert!(exchange
            .failure_cause()
            .unwrap()
            .to_string()
            .contains("upstream exploded"));
    }

    #[test]
    fn async_task_after_completion_terminates_immediately() {
        let runtime = build_io_runtime(1).unwrap();
        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000))
            .unwrap()
            .with_io(IoExecutor::new(runtime.handle().clone()));
        exchange.state().mark_connection_closed();

        let err = exchange
            .run_async_task("late", || async { Ok::<_, TaskError>(1) })
            .unwrap_err();
        assert!(err.is_terminated());
        assert_eq!(exchange.outcome(), Outcome::ConnectionClosed);
    }

    #[test]
    fn async_task_without_executor_fails() {
        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(1_000)).unwrap();
        let err = exchange
            .run_async_task("orphan", || async { Ok::<_, TaskError>(()) })
            .unwrap_err();
        assert!(err.is_terminated());
        assert_eq!(exchange.outcome(), Outcome::Exception);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn async_task_inside_caller_runtime_fails_fast() {
        let (transport, _probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(300)).unwrap();
        let started = Instant::now();
        let err = exchange
            .run_async_task("instant", || async { Ok::<_, TaskError>(1) })
            .unwrap_err();
        assert!(err.is_terminated());
        assert_eq!(exchange.outcome(), Outcome::Exception);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn io_runtime_shutdown_during_join_interrupts() {
        let runtime = build_io_runtime(1).unwrap();
        let io = IoExecutor::new(runtime.handle().clone());
        let (transport, probe) = InMemoryTransport::get("/");
        let mut exchange = Exchange::new(transport, &config(5_000)).unwrap().with_io(io);

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            runtime.shutdown_background();
        });
        let started = Instant::now();
        let err = exchange
            .run_async_task("stalled", || async {
                futures::future::pending::<()>().await;
                Ok::<_, TaskError>(())
            })
            .unwrap_err();
        stopper.join().unwrap();

        assert!(err.is_terminated());
        assert_eq!(exchange.outcome(), Outcome::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(2));
        exchange.dispatch();
        assert_eq!(probe.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
