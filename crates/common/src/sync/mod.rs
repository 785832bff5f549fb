//! Async coordination primitives
//!
//! [`SingleFlight`] collapses concurrent executions of the same keyed
//! operation into one shared in-flight task.

mod single_flight;

pub use single_flight::{FlightError, SingleFlight};
