//! Telemetry error types.

use thiserror::Error;

/// Errors raised while wiring up observability.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid configuration value.
    #[error("invalid telemetry configuration: {0}")]
    InvalidConfiguration(String),

    /// Tracing subscriber could not be installed.
    #[error("tracing subscriber error: {0}")]
    Tracing(String),

    /// OTLP pipeline failed to build.
    #[error("OpenTelemetry error: {0}")]
    OpenTelemetry(String),

    /// Prometheus exporter failed to start.
    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Result alias for telemetry setup.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
