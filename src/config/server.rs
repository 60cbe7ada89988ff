//! Controller and exchange configuration structures.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker pool and lifecycle settings for the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Worker threads in the standard pool.
    pub standard_parallelism: usize,
    /// Worker threads in the priority pool.
    pub priority_parallelism: usize,
    /// Tasks the standard pool may hold beyond its running ones.
    pub standard_queue_depth: usize,
    /// Tasks the priority pool may hold beyond its running ones.
    pub priority_queue_depth: usize,
    /// Threads of the runtime async tasks run on.
    pub io_threads: usize,
    /// How long `close()` waits for in-flight work.
    pub shutdown_grace_ms: u64,
    /// Run a background deadline watchdog.
    pub watchdog: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            standard_parallelism: cpus,
            priority_parallelism: (cpus / 2).max(1),
            standard_queue_depth: 0,
            priority_queue_depth: 0,
            io_threads: 2,
            shutdown_grace_ms: 5_000,
            watchdog: true,
        }
    }
}

impl ControllerConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the standard pool parallelism.
    #[must_use]
    pub const fn with_standard_parallelism(mut self, n: usize) -> Self {
        self.standard_parallelism = n;
        self
    }

    /// Set the priority pool parallelism.
    #[must_use]
    pub const fn with_priority_parallelism(mut self, n: usize) -> Self {
        self.priority_parallelism = n;
        self
    }

    /// Set the standard pool queue depth.
    #[must_use]
    pub const fn with_standard_queue_depth(mut self, n: usize) -> Self {
        self.standard_queue_depth = n;
        self
    }

    /// Set the priority pool queue depth.
    #[must_use]
    pub const fn with_priority_queue_depth(mut self, n: usize) -> Self {
        self.priority_queue_depth = n;
        self
    }

    /// Set the I/O runtime thread count.
    #[must_use]
    pub const fn with_io_threads(mut self, n: usize) -> Self {
        self.io_threads = n;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.shutdown_grace_ms = ms;
        self
    }

    /// Enable or disable the deadline watchdog.
    #[must_use]
    pub const fn with_watchdog(mut self, enabled: bool) -> Self {
        self.watchdog = enabled;
        self
    }

    /// Shutdown grace period as a duration.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.standard_parallelism == 0 {
            return Err("standard_parallelism must be greater than 0".into());
        }
        if self.priority_parallelism == 0 {
            return Err("priority_parallelism must be greater than 0".into());
        }
        if self.io_threads == 0 {
            return Err("io_threads must be greater than 0".into());
        }
        Ok(())
    }
}

/// Per-request limits applied to every exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Deadline measured from the transport's start time.
    pub timeout_ms: u64,
    /// Capacity of the request body buffer in bytes.
    pub request_buffer_capacity: usize,
    /// Capacity of the response body buffer in bytes.
    pub response_buffer_capacity: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            request_buffer_capacity: 64 * 1024,
            response_buffer_capacity: 1024 * 1024,
        }
    }
}

impl ExchangeConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request timeout in milliseconds.
    #[must_use]
    pub const fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Set the request buffer capacity.
    #[must_use]
    pub const fn with_request_buffer_capacity(mut self, bytes: usize) -> Self {
        self.request_buffer_capacity = bytes;
        self
    }

    /// Set the response buffer capacity.
    #[must_use]
    pub const fn with_response_buffer_capacity(mut self, bytes: usize) -> Self {
        self.response_buffer_capacity = bytes;
        self
    }

    /// Timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Timeout in nanoseconds.
    #[must_use]
    pub const fn timeout_nanos(&self) -> u128 {
        self.timeout_ms as u128 * 1_000_000
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Controller settings.
    pub controller: ControllerConfig,
    /// Exchange settings.
    pub exchange: ExchangeConfig,
}

impl ServerConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field, prefixed by its section.
    pub fn validate(&self) -> Result<(), String> {
        self.controller
            .validate()
            .map_err(|e| format!("controller invalid: {e}"))?;
        self.exchange
            .validate()
            .map_err(|e| format!("exchange invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `EXCHANGE_*` environment variables, loading
    /// a `.env` file first if one exists. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or a
    /// validation message.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let c = &mut cfg.controller;
        read_var(&lookup, "EXCHANGE_STANDARD_PARALLELISM", &mut c.standard_parallelism)?;
        read_var(&lookup, "EXCHANGE_PRIORITY_PARALLELISM", &mut c.priority_parallelism)?;
        read_var(&lookup, "EXCHANGE_STANDARD_QUEUE_DEPTH", &mut c.standard_queue_depth)?;
        read_var(&lookup, "EXCHANGE_PRIORITY_QUEUE_DEPTH", &mut c.priority_queue_depth)?;
        read_var(&lookup, "EXCHANGE_IO_THREADS", &mut c.io_threads)?;
        read_var(&lookup, "EXCHANGE_SHUTDOWN_GRACE_MS", &mut c.shutdown_grace_ms)?;
        read_var(&lookup, "EXCHANGE_WATCHDOG", &mut c.watchdog)?;
        let e = &mut cfg.exchange;
        read_var(&lookup, "EXCHANGE_TIMEOUT_MS", &mut e.timeout_ms)?;
        read_var(&lookup, "EXCHANGE_REQUEST_BUFFER_CAPACITY", &mut e.request_buffer_capacity)?;
        read_var(&lookup, "EXCHANGE_RESPONSE_BUFFER_CAPACITY", &mut e.response_buffer_capacity)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn read_var<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| format!("{key}: cannot parse `{raw}`: {e}"))?;
    }
    Ok(())
}
