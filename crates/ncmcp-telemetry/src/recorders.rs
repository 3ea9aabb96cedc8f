//! Metric-recording helpers shared by the other crates' call sites.

use std::time::Duration;

/// Per tool invocation: name, outcome, latency.
pub fn record_tool_call(tool: &str, outcome: &'static str, duration: Duration) {
    metrics::counter!(
        "ncmcp_tool_calls_total",
        "tool" => tool.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("ncmcp_tool_call_duration_seconds", "tool" => tool.to_string())
        .record(duration.as_secs_f64());
}

/// Per readiness probe of a dependency.
pub fn record_dependency_check(name: &'static str, duration: Duration) {
    metrics::histogram!("ncmcp_dependency_check_duration_seconds", "dependency" => name)
        .record(duration.as_secs_f64());
}

/// Current up/down state of a dependency.
pub fn set_dependency_health(name: &'static str, up: bool) {
    metrics::gauge!("ncmcp_dependency_up", "dependency" => name).set(if up { 1.0 } else { 0.0 });
}
