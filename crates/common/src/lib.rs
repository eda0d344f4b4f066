//! Shared types for the scenario engine: identifiers, scalar values, timestamps.

pub mod types;

pub use types::{EventId, Scalar, SimulationId, Timestamp, now};
