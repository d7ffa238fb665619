//! Logging bootstrap shared by hops binaries.
mod config;
mod tracing_init;

pub use config::TelemetryConfig;
pub use tracing_init::init_telemetry;
