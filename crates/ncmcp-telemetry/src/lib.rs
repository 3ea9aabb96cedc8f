//! Observability core: structured logging, optional OTLP trace export,
//! Prometheus metrics on a dedicated port, and the HTTP middleware that
//! feeds the RED metrics.

pub mod error;
pub mod init;
pub mod middleware;
pub mod recorders;

pub use error::{TelemetryError, TelemetryResult};
pub use init::{TelemetryConfig, TelemetryGuard};
pub use middleware::track_http;
pub use recorders::{record_dependency_check, record_tool_call, set_dependency_health};
