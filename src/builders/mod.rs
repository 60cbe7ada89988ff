pub mod controller_builder;

pub use controller_builder::{build_controller, ExchangeFactory};
