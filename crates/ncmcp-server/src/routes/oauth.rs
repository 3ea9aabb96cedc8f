//! OAuth flow routes.
//!
//! Flow A (`/oauth/authorize`) validates the AI client's request and
//! redirects it straight to the IdP; the bridge never sees that
//! callback. Flow B (`/oauth/authorize-nextcloud` plus the unified
//! `/oauth/callback`) is driven by the bridge itself and ends with a
//! persisted refresh token and a terminal HTML page.

use std::collections::HashMap;

use axum::extract::{OriginalUri, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{error, info, warn};

use ncmcp_auth::flows::{self, DirectAuthorizeRequest};
use ncmcp_auth::{FlowKind, NewFlowSession};
use ncmcp_core::BridgeError;

use crate::state::SharedState;

pub(crate) fn redirect_found(url: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, url.to_string())],
    )
        .into_response()
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "error_description": description,
        })),
    )
        .into_response()
}

fn server_misconfigured() -> Response {
    oauth_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "server_error",
        "OAuth is not configured on this server",
    )
}

/// GET `/oauth/authorize`: Flow A entry.
pub async fn authorize(
    State(state): State<SharedState>,
    Query(request): Query<DirectAuthorizeRequest>,
) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return server_misconfigured();
    };

    if let Err(e) = flows::validate_direct_authorize(
        &request,
        &state.settings.allowed_mcp_clients,
        state.settings.enable_dcr,
    ) {
        warn!(error = e.error, description = %e.description, "direct authorize rejected");
        return oauth_error(
            StatusCode::from_u16(e.status).unwrap_or(StatusCode::BAD_REQUEST),
            e.error,
            &e.description,
        );
    }

    let resource_scopes = state.registry.all_scopes();
    let url = flows::direct_authorize_url(
        &oauth.browser_authorization_endpoint,
        &request,
        &resource_scopes,
        &state.settings.mcp_resource(),
    );
    redirect_found(&url)
}

/// GET `/oauth/authorize-nextcloud`: Flow B entry.
pub async fn authorize_nextcloud(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return server_misconfigured();
    };
    let Some(flow_state) = params.get("state").filter(|s| !s.is_empty()) else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "state parameter is required",
        );
    };

    // The provisioning tool usually opened the session already; a direct
    // browser entry gets a fresh one.
    match state.storage.get_flow_session(flow_state).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            if let Err(e) = state
                .storage
                .store_flow_session(
                    &NewFlowSession {
                        session_id: flow_state.clone(),
                        state: Some(flow_state.clone()),
                        flow: Some(FlowKind::ServerMediated),
                        is_provisioning: true,
                        ..Default::default()
                    },
                    None,
                )
                .await
            {
                error!(error = %e, "could not open provisioning session");
                return oauth_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "could not open a provisioning session",
                );
            }
        }
        Err(e) => {
            error!(error = %e, "session lookup failed");
            return oauth_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "session lookup failed",
            );
        }
    }

    let callback = format!("{}/oauth/callback", state.settings.server_url());
    let url = flows::provisioning_authorize_url(
        &oauth.browser_authorization_endpoint,
        &oauth.credentials.client_id,
        &callback,
        flow_state,
        &state.settings.resource_uri(),
    );
    info!("server-mediated provisioning: redirecting to IdP");
    redirect_found(&url)
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

const PROVISIONED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Nextcloud Access Provisioned</title>
  <style>
    body { font-family: sans-serif; text-align: center; margin-top: 50px; }
    .success { color: green; }
    .info { margin-top: 20px; color: #666; }
  </style>
</head>
<body>
  <h1 class="success">&#10003; Nextcloud Access Provisioned</h1>
  <p>The bridge now has offline access to your Nextcloud resources.</p>
  <p class="info">You can close this window and return to your MCP client.</p>
</body>
</html>"#;

/// GET `/oauth/callback` (and the legacy `/oauth/callback-nextcloud`):
/// Flow B completion.
pub async fn callback(
    State(state): State<SharedState>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return server_misconfigured();
    };

    if let Some(error) = params.error.as_deref() {
        let description = params
            .error_description
            .as_deref()
            .unwrap_or("authorization failed");
        error!(error, description, "IdP returned an authorization error");
        return oauth_error(StatusCode::BAD_REQUEST, error, description);
    }

    let (Some(code), Some(flow_state)) = (params.code.as_deref(), params.state.as_deref()) else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "code and state parameters are required",
        );
    };

    let session = match state.storage.get_flow_session(flow_state).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "authorization session is expired or unknown",
            );
        }
        Err(e) => {
            error!(error = %e, "session lookup failed");
            return oauth_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "session lookup failed",
            );
        }
    };

    // The redirect_uri presented at the token endpoint must match the
    // one the browser arrived through, alias or not.
    let redirect_uri = format!("{}{}", state.settings.server_url(), uri.path());

    let tokens = match flows::exchange_code(
        &state.http,
        &oauth.discovery.token_endpoint,
        code,
        &redirect_uri,
        &oauth.credentials.client_id,
        &oauth.credentials.client_secret,
        None,
    )
    .await
    {
        Ok(tokens) => tokens,
        Err(BridgeError::UpstreamHttp { status, body }) => {
            error!(status, body = %body, "code exchange failed at the IdP");
            return (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                Json(serde_json::json!({
                    "error": "token_exchange_failed",
                    "upstream_status": status,
                })),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "code exchange failed");
            return oauth_error(
                StatusCode::BAD_GATEWAY,
                "server_error",
                "token endpoint was unreachable",
            );
        }
    };

    let user_id = tokens
        .id_token
        .as_deref()
        .and_then(flows::decode_id_token_claims)
        .and_then(|claims| claims.sub)
        .unwrap_or_else(|| {
            warn!("no decodable ID token in provisioning response");
            "unknown".to_string()
        });

    if let Some(refresh_token) = tokens.refresh_token.as_deref() {
        let granted = tokens.granted_scopes();
        if let Err(e) = state
            .storage
            .store_refresh_token(
                &user_id,
                refresh_token,
                None,
                FlowKind::ServerMediated,
                Some(&state.settings.resource_uri()),
                Some(flow_state),
                &granted,
            )
            .await
        {
            error!(error = %e, user_id, "could not persist refresh token");
            return oauth_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "could not persist the refresh token",
            );
        }
        let _ = state
            .storage
            .audit(
                "refresh_token_provisioned",
                &user_id,
                Some("refresh_token"),
                None,
                "oauth",
            )
            .await;
        info!(user_id, "stored server-mediated refresh token");
    } else {
        warn!(user_id, "IdP granted no refresh token; offline access unavailable");
    }

    let _ = state.storage.delete_flow_session(&session.session_id).await;
    Html(PROVISIONED_PAGE).into_response()
}
