//! HTTP rendering of bridge errors.
//!
//! Authentication failures get a bearer challenge, scope failures get the
//! RFC 6750 `insufficient_scope` challenge pointing at the PRM document,
//! rate limiting gets `Retry-After`, and upstream pass-throughs keep
//! their status. Internal detail stays in the logs.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

use ncmcp_core::BridgeError;

/// Response-side wrapper around [`BridgeError`].
#[derive(Debug)]
pub struct ApiError {
    error: BridgeError,
    /// The bridge's public URL, for challenge headers.
    server_url: String,
}

impl ApiError {
    pub fn new(error: BridgeError, server_url: impl Into<String>) -> Self {
        Self {
            error,
            server_url: server_url.into(),
        }
    }

    fn prm_url(&self) -> String {
        format!(
            "{}/.well-known/oauth-protected-resource/mcp",
            self.server_url
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        match &self.error {
            BridgeError::Auth(detail) => {
                warn!(detail, "request failed authentication");
                let challenge = format!("Bearer resource_metadata=\"{}\"", self.prm_url());
                let mut response = (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({
                        "error": "invalid_token",
                        "error_description": "authentication failed",
                    })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&challenge) {
                    response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
                }
                response
            }
            BridgeError::InsufficientScope { missing } => {
                let scope = missing.join(" ");
                let challenge = format!(
                    "Bearer error=\"insufficient_scope\", scope=\"{scope}\", resource_metadata=\"{}\"",
                    self.prm_url()
                );
                let mut response = (
                    StatusCode::FORBIDDEN,
                    Json(serde_json::json!({
                        "error": "insufficient_scope",
                        "scopes_required": missing,
                    })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&challenge) {
                    response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
                }
                response
            }
            BridgeError::RateLimited { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({
                        "error": "rate_limited",
                        "error_description": "too many provisioning attempts",
                        "retry_after": retry_after_secs,
                    })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            BridgeError::UpstreamHttp { status: upstream, body } => {
                warn!(status = upstream, body = %body, "surfacing upstream error");
                (
                    status,
                    Json(serde_json::json!({
                        "error": "upstream_error",
                        "error_description": format!("upstream returned status {upstream}"),
                    })),
                )
                    .into_response()
            }
            BridgeError::InvalidArgument(message) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "invalid_request",
                    "error_description": message,
                })),
            )
                .into_response(),
            BridgeError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "error": "not_found",
                    "error_description": "resource not found",
                })),
            )
                .into_response(),
            other => {
                error!(error = %other, "internal error");
                (
                    status,
                    Json(serde_json::json!({
                        "error": "internal_error",
                        "error_description": other.to_string(),
                    })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insufficient_scope_carries_the_challenge_header() {
        let err = ApiError::new(
            BridgeError::InsufficientScope {
                missing: vec!["notes:write".into()],
            },
            "http://localhost:8000",
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.contains("insufficient_scope"));
        assert!(challenge.contains("scope=\"notes:write\""));
        assert!(challenge
            .contains("http://localhost:8000/.well-known/oauth-protected-resource/mcp"));
    }

    #[tokio::test]
    async fn rate_limited_carries_retry_after() {
        let err = ApiError::new(
            BridgeError::RateLimited {
                retry_after_secs: 3540,
            },
            "http://localhost:8000",
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "3540"
        );
    }
}
