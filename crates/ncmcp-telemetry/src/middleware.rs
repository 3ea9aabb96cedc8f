//! HTTP observability middleware.
//!
//! One layer feeds the RED metrics (request counter, latency histogram,
//! in-flight gauge) and writes the access log. Health, metrics, and
//! status-polling endpoints are excluded from the access log to keep it
//! signal-heavy; their metrics are still recorded.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{info, info_span, Instrument};

/// Paths whose requests never reach the access log.
const ACCESS_LOG_EXCLUDED: &[&str] = &["/health/live", "/health/ready", "/metrics", "/app/poll"];

fn access_log_excluded(path: &str) -> bool {
    ACCESS_LOG_EXCLUDED.iter().any(|p| path.starts_with(p))
}

/// Record metrics and a request span for every request.
pub async fn track_http(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    // Prefer the route template over the raw path so metrics stay
    // low-cardinality.
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |m| m.as_str().to_string());

    let start = Instant::now();
    metrics::gauge!("ncmcp_http_requests_in_flight").increment(1.0);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.route = %endpoint,
    );
    let response = next.run(request).instrument(span).await;

    let status = response.status().as_u16();
    let elapsed = start.elapsed();
    metrics::gauge!("ncmcp_http_requests_in_flight").decrement(1.0);
    metrics::counter!(
        "ncmcp_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "ncmcp_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint.clone()
    )
    .record(elapsed.as_secs_f64());

    if !access_log_excluded(&endpoint) {
        info!(
            method = %method,
            endpoint = %endpoint,
            status,
            duration_ms = elapsed.as_millis() as u64,
            "request"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[test]
    fn health_and_metrics_paths_are_excluded_from_access_logs() {
        assert!(access_log_excluded("/health/live"));
        assert!(access_log_excluded("/health/ready"));
        assert!(access_log_excluded("/metrics"));
        assert!(!access_log_excluded("/mcp"));
        assert!(!access_log_excluded("/oauth/authorize"));
    }

    #[tokio::test]
    async fn middleware_passes_responses_through() {
        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn(track_http));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/ping")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
