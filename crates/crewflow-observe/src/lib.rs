//! Observability setup for crewflow: structured `tracing` output with an
//! optional OpenTelemetry bridge.

pub mod tracing_setup;

pub use tracing_setup::{default_filter, init_tracing, shutdown_tracing};
