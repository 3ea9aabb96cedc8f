//! HTTP surface assembly.

pub mod browser;
pub mod health;
pub mod mcp;
pub mod oauth;
pub mod passwords;
pub mod webhooks;
pub mod wellknown;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::auth_middleware::resolve_auth;
use crate::state::SharedState;

/// Build the full router for the resolved state.
pub fn build_router(state: SharedState) -> Router {
    // The tool-protocol path resolves credentials per the operating mode.
    let mcp_routes = Router::new()
        .route("/mcp", post(mcp::handle))
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_auth));

    // Admin surface: cookie session (OAuth) or configured user (Basic).
    let app_routes = Router::new()
        .route("/", get(browser::admin_home))
        .route("/user", get(browser::admin_user))
        .route("/webhooks", get(browser::admin_webhooks))
        .route("/webhooks/{webhook_id}", delete(browser::admin_delete_webhook))
        .route("/revoke", post(browser::admin_revoke))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            browser::require_session,
        ));

    let mut router = Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/webhooks/nextcloud", post(webhooks::receive))
        .route(
            "/api/v1/users/{user_id}/app-password",
            post(passwords::provision)
                .get(passwords::status)
                .delete(passwords::revoke),
        )
        .merge(mcp_routes)
        .nest("/app", app_routes);

    // OAuth endpoints and PRM only exist as a resource server.
    if state.oauth.is_some() {
        router = router
            .route(
                "/.well-known/oauth-protected-resource",
                get(wellknown::protected_resource_metadata),
            )
            .route(
                "/.well-known/oauth-protected-resource/mcp",
                get(wellknown::protected_resource_metadata),
            )
            .route("/oauth/authorize", get(oauth::authorize))
            .route("/oauth/authorize-nextcloud", get(oauth::authorize_nextcloud))
            .route("/oauth/callback", get(oauth::callback))
            .route("/oauth/callback-nextcloud", get(oauth::callback))
            .route("/oauth/login", get(browser::login))
            .route("/oauth/login-callback", get(browser::login_callback))
            .route("/oauth/logout", get(browser::logout));
    }

    router
        .layer(middleware::from_fn(ncmcp_telemetry::track_http))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
