//! Inbound webhook receiver.
//!
//! Accepts upstream webhook deliveries, logs the payload, and answers
//! immediately. Malformed JSON is a 400.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{info, warn};

use crate::state::SharedState;

/// POST `/webhooks/nextcloud`.
pub async fn receive(
    State(_state): State<SharedState>,
    body: Result<Json<serde_json::Value>, axum::extract::rejection::JsonRejection>,
) -> Response {
    match body {
        Ok(Json(payload)) => {
            info!(payload = %payload, "webhook received from upstream");
            Json(serde_json::json!({
                "status": "received",
                "timestamp": payload.get("time"),
            }))
            .into_response()
        }
        Err(rejection) => {
            warn!(error = %rejection, "malformed webhook payload");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "invalid_payload",
                    "message": rejection.body_text(),
                })),
            )
                .into_response()
        }
    }
}
