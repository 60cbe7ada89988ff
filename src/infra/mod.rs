//! Infrastructure adapters for the transport seam.

pub mod memory;

pub use memory::{InMemoryTransport, ResponseProbe};
