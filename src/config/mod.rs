//! Configuration models for the controller and per-request exchanges.

pub mod server;

pub use server::{ControllerConfig, ExchangeConfig, ServerConfig};
