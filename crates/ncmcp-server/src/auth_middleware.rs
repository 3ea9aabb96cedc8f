//! Per-request auth resolution for the tool-protocol path.
//!
//! The mode decides what a request must carry: nothing (single-user
//! Basic, credentials come from configuration), a Basic header
//! (multi-user), or a bearer token (OAuth). Whatever resolves lands in a
//! request extension; an empty extension makes tool calls fail
//! authorization downstream.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use ncmcp_auth::{parse_basic_header, preview_auth_header, RequestAuthContext};
use ncmcp_core::AuthMode;

use crate::state::SharedState;

/// The resolved (or absent) auth context for this request.
#[derive(Debug, Clone)]
pub struct AuthExtension(pub Option<RequestAuthContext>);

/// Resolve the request's credentials per the operating mode.
pub async fn resolve_auth(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match &auth_header {
        Some(value) => {
            debug!(authorization = %preview_auth_header(value), "tool request credentials");
        }
        None if state.mode.is_oauth() => {
            warn!("tool request without Authorization header in OAuth mode");
        }
        None => {}
    }

    let context = resolve(&state, auth_header.as_deref()).await;
    request.extensions_mut().insert(AuthExtension(context));
    next.run(request).await
}

async fn resolve(state: &SharedState, header: Option<&str>) -> Option<RequestAuthContext> {
    match state.mode {
        AuthMode::SingleUserBasic => {
            let username = state.settings.nextcloud_username.clone()?;
            let password = state.settings.nextcloud_password.clone()?;
            Some(RequestAuthContext::Basic { username, password })
        }
        AuthMode::MultiUserBasic => {
            let (username, password) = parse_basic_header(header?)?;
            Some(RequestAuthContext::Basic { username, password })
        }
        AuthMode::OAuthResourceServer => {
            let oauth = state.oauth.as_ref()?;
            let bearer = header?.strip_prefix("Bearer ")?;
            let verified = oauth.verifier.verify(bearer).await?;

            let upstream_token = match &oauth.exchanger {
                Some(exchanger) => match exchanger.exchange(bearer).await {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(error = %e, "token exchange failed, rejecting request");
                        return None;
                    }
                },
                None => bearer.to_string(),
            };

            Some(RequestAuthContext::Bearer {
                token: verified,
                upstream_token,
            })
        }
    }
}
