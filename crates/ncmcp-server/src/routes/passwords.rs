//! App-password provisioning API (multi-user Basic mode).
//!
//! `POST/GET/DELETE /api/v1/users/{user_id}/app-password`. The caller
//! proves ownership with Basic credentials whose username must equal the
//! path user id; the password being provisioned is validated against the
//! upstream before it is stored encrypted. Provisioning is rate limited
//! per user.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{info, warn};

use ncmcp_auth::{parse_basic_header, RateLimitDecision};

use crate::state::SharedState;

fn failure(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(serde_json::json!({"success": false, "error": error})),
    )
        .into_response()
}

/// Extract and check the Basic pair; the username must match the path.
fn caller_credentials(
    headers: &HeaderMap,
    path_user_id: &str,
) -> Result<(String, String), Response> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| failure(StatusCode::UNAUTHORIZED, "missing Basic credentials"))?;

    let (username, password) = parse_basic_header(header_value)
        .ok_or_else(|| failure(StatusCode::UNAUTHORIZED, "invalid Basic credentials"))?;

    if username != path_user_id {
        warn!(path_user_id, "username mismatch on app-password operation");
        return Err(failure(
            StatusCode::FORBIDDEN,
            "username does not match path user_id",
        ));
    }
    Ok((username, password))
}

/// Validate the supplied app password against the upstream OCS user
/// endpoint, checking the reported user id.
async fn validate_against_upstream(
    state: &SharedState,
    username: &str,
    password: &str,
) -> Result<(), Response> {
    let url = format!("{}/ocs/v1.php/cloud/user", state.settings.host());
    let response = state
        .http
        .get(&url)
        .basic_auth(username, Some(password))
        .header("OCS-APIRequest", "true")
        .query(&[("format", "json")])
        .send()
        .await
        .map_err(|e| {
            warn!(error = %e, "upstream credential validation unreachable");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "failed to validate credentials")
        })?;

    if response.status() != StatusCode::OK {
        return Err(failure(StatusCode::UNAUTHORIZED, "invalid app password"));
    }

    let body: serde_json::Value = response.json().await.map_err(|_| {
        failure(StatusCode::INTERNAL_SERVER_ERROR, "failed to validate credentials")
    })?;
    let reported = body
        .pointer("/ocs/data/id")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if reported != username {
        warn!("user id mismatch in OCS validation response");
        return Err(failure(StatusCode::FORBIDDEN, "user id mismatch"));
    }
    Ok(())
}

/// POST: validate and store an app password.
pub async fn provision(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let RateLimitDecision::Limited { retry_after_secs } = state.rate_limiter.check(&user_id) {
        warn!(user_id, "app-password provisioning rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            Json(serde_json::json!({
                "success": false,
                "error": format!("rate limit exceeded, try again in {retry_after_secs} seconds"),
            })),
        )
            .into_response();
    }

    let (username, app_password) = match caller_credentials(&headers, &user_id) {
        Ok(pair) => pair,
        Err(response) => {
            state.rate_limiter.record(&user_id);
            return response;
        }
    };

    if let Err(response) = validate_against_upstream(&state, &username, &app_password).await {
        state.rate_limiter.record(&user_id);
        return response;
    }

    if let Err(e) = state.storage.store_app_password(&username, &app_password).await {
        warn!(error = %e, user_id, "app-password storage failed");
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "storage failure");
    }

    state.rate_limiter.record(&user_id);
    let _ = state
        .storage
        .audit("app_password_provisioned", &username, Some("app_password"), None, "basic")
        .await;
    info!(user_id, "app password provisioned");

    Json(serde_json::json!({
        "success": true,
        "message": format!("app password stored for {username}"),
    }))
    .into_response()
}

/// GET: report whether an app password is stored.
pub async fn status(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = caller_credentials(&headers, &user_id) {
        return response;
    }

    match state.storage.get_app_password(&user_id).await {
        Ok(found) => Json(serde_json::json!({
            "success": true,
            "exists": found.is_some(),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, user_id, "app-password lookup failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "storage failure")
        }
    }
}

/// DELETE: revoke a stored app password.
pub async fn revoke(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = caller_credentials(&headers, &user_id) {
        return response;
    }

    match state.storage.delete_app_password(&user_id).await {
        Ok(true) => {
            let _ = state
                .storage
                .audit("app_password_revoked", &user_id, Some("app_password"), None, "basic")
                .await;
            info!(user_id, "app password revoked");
            Json(serde_json::json!({"success": true})).into_response()
        }
        Ok(false) => failure(StatusCode::NOT_FOUND, "no app password stored"),
        Err(e) => {
            warn!(error = %e, user_id, "app-password revocation failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "storage failure")
        }
    }
}
