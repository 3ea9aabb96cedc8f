//! RFC 9728 Protected Resource Metadata.
//!
//! Served at both the root and the `/mcp` path-based location.
//! `scopes_supported` is derived from the tool registry's scope union,
//! so the advertisement can never drift from what the tools enforce.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::SharedState;

/// GET `/.well-known/oauth-protected-resource[/mcp]`.
pub async fn protected_resource_metadata(State(state): State<SharedState>) -> Response {
    let authorization_server = state
        .settings
        .public_issuer_url
        .clone()
        .or_else(|| state.oauth.as_ref().map(|o| o.issuer.clone()))
        .unwrap_or_else(|| state.settings.host().to_string());

    Json(serde_json::json!({
        "resource": state.settings.mcp_resource(),
        "scopes_supported": state.registry.all_scopes(),
        "authorization_servers": [authorization_server],
        "bearer_methods_supported": ["header"],
        "resource_signing_alg_values_supported": ["RS256"],
    }))
    .into_response()
}
