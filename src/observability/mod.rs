//! Logging and deterministic telemetry counters.

pub mod logging;
pub mod telemetry;

pub use logging::{CollectorLogger, LogHandle, LogLevel, LogRotationPolicy, LoggingError};
pub use telemetry::{ReactorTelemetry, StoreTelemetry};
