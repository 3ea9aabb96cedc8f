//! Browser session flow and the admin web surface.
//!
//! The `/oauth/login*` routes drive a PKCE-protected code flow for the
//! admin pages only; the resulting `mcp_session` cookie (the user id,
//! HttpOnly, SameSite=Lax, 30 days) is authoritative for `/app` routes
//! and nowhere else. In Basic modes the admin surface authenticates as
//! the configured user without a cookie.

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{error, info, warn};

use ncmcp_auth::flows::{self, generate_pkce, random_token};
use ncmcp_auth::{FlowKind, NewFlowSession};
use ncmcp_core::{AuthMode, BridgeError};

use crate::routes::oauth::redirect_found;
use crate::state::SharedState;

const SESSION_COOKIE: &str = "mcp_session";
const SESSION_MAX_AGE_SECS: u64 = 30 * 24 * 3600;

/// The authenticated admin user, injected by [`require_session`].
#[derive(Debug, Clone)]
pub struct AdminUser(pub String);

fn cookie_value(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn session_cookie(value: &str, max_age: u64) -> String {
    format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}")
}

fn error_page(status: StatusCode, message: &str) -> Response {
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Login failed</title>
<style>body {{ font-family: sans-serif; text-align: center; margin-top: 50px; }} .error {{ color: #b00; }}</style>
</head>
<body><h1 class="error">Login failed</h1><p>{message}</p></body>
</html>"#
    );
    (status, Html(body)).into_response()
}

/// GET `/oauth/login`: start the browser session flow.
pub async fn login(State(state): State<SharedState>) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return error_page(StatusCode::INTERNAL_SERVER_ERROR, "OAuth is not configured");
    };

    let flow_state = random_token();
    let pkce = generate_pkce();

    // The session's challenge column holds the server-side verifier; the
    // challenge itself is derivable and only the IdP needs it.
    if let Err(e) = state
        .storage
        .store_flow_session(
            &NewFlowSession {
                session_id: flow_state.clone(),
                state: Some(flow_state.clone()),
                code_challenge: Some(pkce.verifier.clone()),
                code_challenge_method: Some("S256".into()),
                flow: Some(FlowKind::ServerMediated),
                ..Default::default()
            },
            None,
        )
        .await
    {
        error!(error = %e, "could not open a login session");
        return error_page(StatusCode::INTERNAL_SERVER_ERROR, "could not open a login session");
    }

    let callback = format!("{}/oauth/login-callback", state.settings.server_url());
    let url = flows::browser_login_url(
        &oauth.browser_authorization_endpoint,
        &oauth.credentials.client_id,
        &callback,
        &flow_state,
        &pkce.challenge,
    );
    redirect_found(&url)
}

#[derive(Debug, Deserialize)]
pub struct LoginCallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// GET `/oauth/login-callback`: complete the browser session flow.
pub async fn login_callback(
    State(state): State<SharedState>,
    axum::extract::Query(params): axum::extract::Query<LoginCallbackParams>,
) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return error_page(StatusCode::INTERNAL_SERVER_ERROR, "OAuth is not configured");
    };

    if let Some(error) = params.error.as_deref() {
        let description = params.error_description.as_deref().unwrap_or("login failed");
        warn!(error, description, "IdP rejected the browser login");
        return error_page(StatusCode::BAD_REQUEST, description);
    }

    let (Some(code), Some(flow_state)) = (params.code.as_deref(), params.state.as_deref()) else {
        return error_page(StatusCode::BAD_REQUEST, "code and state parameters are required");
    };

    let session = match state.storage.get_flow_session(flow_state).await {
        Ok(Some(session)) => session,
        _ => {
            return error_page(
                StatusCode::BAD_REQUEST,
                "login session is expired or unknown; start over",
            );
        }
    };

    let callback = format!("{}/oauth/login-callback", state.settings.server_url());
    let tokens = match flows::exchange_code(
        &state.http,
        &oauth.discovery.token_endpoint,
        code,
        &callback,
        &oauth.credentials.client_id,
        &oauth.credentials.client_secret,
        session.code_challenge.as_deref(),
    )
    .await
    {
        Ok(tokens) => tokens,
        Err(BridgeError::UpstreamHttp { status, body }) => {
            error!(status, body = %body, "browser login code exchange failed");
            return error_page(
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                &format!("the identity provider rejected the login (status {status})"),
            );
        }
        Err(e) => {
            error!(error = %e, "browser login code exchange failed");
            return error_page(StatusCode::BAD_GATEWAY, "the identity provider was unreachable");
        }
    };

    let Some(user_id) = tokens
        .id_token
        .as_deref()
        .and_then(flows::decode_id_token_claims)
        .and_then(|claims| claims.sub)
    else {
        return error_page(StatusCode::BAD_GATEWAY, "the identity provider sent no usable identity");
    };

    if let Some(refresh_token) = tokens.refresh_token.as_deref() {
        if let Err(e) = state
            .storage
            .store_refresh_token(
                &user_id,
                refresh_token,
                None,
                FlowKind::ServerMediated,
                Some(&state.settings.resource_uri()),
                None,
                &tokens.granted_scopes(),
            )
            .await
        {
            error!(error = %e, user_id, "could not persist browser-session refresh token");
            return error_page(StatusCode::INTERNAL_SERVER_ERROR, "could not persist the session");
        }
        let _ = state
            .storage
            .audit("browser_login", &user_id, Some("session"), None, "oauth")
            .await;
    }

    let _ = state.storage.delete_flow_session(&session.session_id).await;
    info!(user_id, "browser session established");

    (
        StatusCode::FOUND,
        [
            (header::LOCATION, "/app/".to_string()),
            (
                header::SET_COOKIE,
                session_cookie(&user_id, SESSION_MAX_AGE_SECS),
            ),
        ],
    )
        .into_response()
}

/// GET `/oauth/logout`: clear the admin session cookie.
pub async fn logout() -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, "/oauth/login".to_string()),
            (header::SET_COOKIE, session_cookie("", 0)),
        ],
    )
        .into_response()
}

/// Gate for `/app` routes: Basic modes authenticate as the configured
/// user; OAuth mode needs a session cookie backed by a stored refresh
/// token. Unauthenticated browsers are bounced to the login flow.
pub async fn require_session(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match state.mode {
        AuthMode::SingleUserBasic | AuthMode::MultiUserBasic => Some(
            state
                .settings
                .nextcloud_username
                .clone()
                .unwrap_or_else(|| "admin".to_string()),
        ),
        AuthMode::OAuthResourceServer => {
            match cookie_value(request.headers(), SESSION_COOKIE) {
                Some(user_id) if !user_id.is_empty() => {
                    match state.storage.get_refresh_token(&user_id).await {
                        Ok(Some(_)) => Some(user_id),
                        _ => None,
                    }
                }
                _ => None,
            }
        }
    };

    match user {
        Some(user_id) => {
            request.extensions_mut().insert(AdminUser(user_id));
            next.run(request).await
        }
        None => redirect_found("/oauth/login"),
    }
}

/// GET `/app/`: minimal admin landing page.
pub async fn admin_home(
    axum::Extension(AdminUser(user_id)): axum::Extension<AdminUser>,
) -> Response {
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Bridge Administration</title>
<style>body {{ font-family: sans-serif; margin: 40px; }}</style>
</head>
<body>
  <h1>Bridge Administration</h1>
  <p>Signed in as <strong>{user_id}</strong>.</p>
  <ul>
    <li><a href="/app/user">User info</a></li>
    <li><a href="/app/webhooks">Registered webhooks</a></li>
    <li><a href="/oauth/logout">Log out</a></li>
  </ul>
</body>
</html>"#
    );
    Html(body).into_response()
}

/// GET `/app/user`: the session user plus any cached profile.
pub async fn admin_user(
    State(state): State<SharedState>,
    axum::Extension(AdminUser(user_id)): axum::Extension<AdminUser>,
) -> Response {
    let profile = state
        .storage
        .get_user_profile(&user_id)
        .await
        .unwrap_or_default();
    let has_refresh_token = matches!(
        state.storage.get_refresh_token(&user_id).await,
        Ok(Some(_))
    );
    Json(serde_json::json!({
        "user_id": user_id,
        "auth_mode": state.mode.to_string(),
        "offline_access": has_refresh_token,
        "profile": profile,
    }))
    .into_response()
}

/// GET `/app/webhooks`: all registrations the bridge tracks.
pub async fn admin_webhooks(State(state): State<SharedState>) -> Response {
    match state.storage.list_webhooks().await {
        Ok(webhooks) => Json(serde_json::json!({
            "webhooks": webhooks.iter().map(|w| serde_json::json!({
                "webhook_id": w.webhook_id,
                "preset_id": w.preset_id,
                "created_at": w.created_at,
            })).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "webhook listing failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// DELETE `/app/webhooks/{id}`: forget one registration.
pub async fn admin_delete_webhook(
    State(state): State<SharedState>,
    Path(webhook_id): Path<i64>,
    axum::Extension(AdminUser(user_id)): axum::Extension<AdminUser>,
) -> Response {
    match state.storage.delete_webhook(webhook_id).await {
        Ok(true) => {
            let _ = state
                .storage
                .audit(
                    "webhook_deleted",
                    &user_id,
                    Some("webhook"),
                    Some(&webhook_id.to_string()),
                    "session",
                )
                .await;
            Json(serde_json::json!({"deleted": true})).into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(error = %e, "webhook deletion failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET `/oauth/revoke` style admin action lives under `/app`: drop the
/// caller's stored refresh token.
pub async fn admin_revoke(
    State(state): State<SharedState>,
    axum::Extension(AdminUser(user_id)): axum::Extension<AdminUser>,
) -> Response {
    match state.storage.delete_refresh_token(&user_id).await {
        Ok(deleted) => {
            if deleted {
                let _ = state
                    .storage
                    .audit("refresh_token_revoked", &user_id, Some("refresh_token"), None, "session")
                    .await;
            }
            Json(serde_json::json!({"revoked": deleted})).into_response()
        }
        Err(e) => {
            error!(error = %e, "revocation failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
