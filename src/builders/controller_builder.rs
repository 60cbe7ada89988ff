//! Builders to construct the controller and exchanges from configuration.

use std::sync::Arc;

use crate::config::{ExchangeConfig, ServerConfig};
use crate::core::{
    Controller, ControllerError, DefaultListener, Exchange, ExchangeError, Listener, MetricsSink,
    Transport,
};
use crate::runtime::IoExecutor;

/// Build a controller from validated server configuration.
///
/// # Errors
///
/// Returns [`ControllerError::InvalidConfig`] if any section fails
/// validation, or whatever [`Controller::new`] returns.
pub fn build_controller(
    cfg: &ServerConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Controller, ControllerError> {
    cfg.validate().map_err(ControllerError::InvalidConfig)?;
    Controller::new(cfg.controller.clone(), metrics)
}

/// Stamps out exchanges sharing one configuration, listener, metrics sink
/// and I/O executor.
#[derive(Clone)]
pub struct ExchangeFactory {
    config: ExchangeConfig,
    listener: Arc<dyn Listener>,
    metrics: Arc<dyn MetricsSink>,
    io: Option<IoExecutor>,
}

impl ExchangeFactory {
    /// Factory with the default listener and the given metrics sink.
    #[must_use]
    pub fn new(config: ExchangeConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            listener: Arc::new(DefaultListener),
            metrics,
            io: None,
        }
    }

    /// Factory wired to `controller`'s I/O executor.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller was closed; its
    /// I/O runtime is gone.
    pub fn for_controller(
        config: ExchangeConfig,
        controller: &Controller,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ControllerError> {
        if controller.is_closed() {
            return Err(ControllerError::Closed);
        }
        Ok(Self::new(config, metrics).with_io(controller.io_executor().clone()))
    }

    /// Replace the listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listener = listener;
        self
    }

    /// Attach an I/O executor to every exchange.
    #[must_use]
    pub fn with_io(mut self, io: IoExecutor) -> Self {
        self.io = Some(io);
        self
    }

    /// Configuration applied to each exchange.
    #[must_use]
    pub const fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Create an exchange for a request accepted by `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::InvalidTimeout`] if the configured timeout is zero.
    pub fn create<T>(&self, transport: T) -> Result<Exchange, ExchangeError>
    where
        T: Transport + 'static,
    {
        let exchange = Exchange::new(transport, &self.config)?
            .with_listener(Arc::clone(&self.listener))
            .with_metrics(Arc::clone(&self.metrics));
        Ok(match &self.io {
            Some(io) => exchange.with_io(io.clone()),
            None => exchange,
        })
    }

    /// Like [`Self::create`] with a handler name for per-handler metrics.
    ///
    /// # Errors
    ///
    /// See [`Self::create`].
    pub fn create_named<T>(
        &self,
        transport: T,
        handler_name: impl Into<String>,
    ) -> Result<Exchange, ExchangeError>
    where
        T: Transport + 'static,
    {
        Ok(self.create(transport)?.with_handler_name(handler_name))
    }
}

impl std::fmt::Debug for ExchangeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeFactory")
            .field("config", &self.config)
            .field("io", &self.io.is_some())
            .finish_non_exhaustive()
    }
}
