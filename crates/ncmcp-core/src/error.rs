//! Bridge-wide error kinds.
//!
//! One enum covers the whole error surface described by the HTTP layer:
//! configuration problems are fatal at startup, authentication failures map
//! to 401, scope failures to 403 with a challenge header, upstream
//! pass-throughs keep their status, and storage/pipeline failures stay
//! internal.

use thiserror::Error;

/// Result alias used across the workspace.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Canonical bridge error exposed by public APIs.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Missing or invalid configuration. Always fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed, expired, or un-audienced credentials. Surfaced as 401.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Valid token, missing capability. Surfaced as 403 with a
    /// `WWW-Authenticate` scope challenge.
    #[error("insufficient scope: missing {}", .missing.join(" "))]
    InsufficientScope {
        /// Scopes the caller's token lacks.
        missing: Vec<String>,
    },

    /// Upstream response passed through after retry exhaustion.
    #[error("upstream returned {status}")]
    UpstreamHttp {
        /// Upstream HTTP status.
        status: u16,
        /// Upstream body, for logs and error envelopes.
        body: String,
    },

    /// Routine upstream 404.
    #[error("not found")]
    NotFound,

    /// Malformed caller input (bad tool arguments, bad payloads).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Local rate limiter rejected the request.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the sliding window admits another attempt.
        retry_after_secs: u64,
    },

    /// Transient database failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Network-level failure talking to the IdP or the upstream.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Per-document indexing failure. Logged, never aborts the pipeline.
    #[error("pipeline error: {0}")]
    Pipeline(String),
}

impl BridgeError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Shorthand for an authentication failure.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Shorthand for a pipeline failure.
    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }

    /// Shorthand for malformed caller input.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// HTTP status this error maps to on the inbound surface.
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope { .. } => StatusCode::FORBIDDEN,
            Self::UpstreamHttp { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage(_) | Self::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_scope_lists_missing_scopes() {
        let err = BridgeError::InsufficientScope {
            missing: vec!["notes:read".into(), "notes:write".into()],
        };
        assert_eq!(
            err.to_string(),
            "insufficient scope: missing notes:read notes:write"
        );
        assert_eq!(err.status_code(), http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn upstream_status_is_preserved() {
        let err = BridgeError::UpstreamHttp {
            status: 409,
            body: "conflict".into(),
        };
        assert_eq!(err.status_code(), http::StatusCode::CONFLICT);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err = BridgeError::RateLimited {
            retry_after_secs: 3540,
        };
        assert_eq!(err.status_code(), http::StatusCode::TOO_MANY_REQUESTS);
    }
}
