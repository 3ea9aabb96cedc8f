//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use ncmcp_auth::{
    ClientCredentials, IdpMode, OidcDiscovery, ProvisioningRateLimiter, RequestAuthContext,
    TokenExchanger, TokenStorage, TokenVerifier,
};
use ncmcp_client::NextcloudClient;
use ncmcp_core::{AuthMode, BridgeResult, Settings};

use crate::registry::ToolRegistry;

/// OAuth-mode state assembled at startup.
#[derive(Debug)]
pub struct OAuthState {
    pub discovery: OidcDiscovery,
    pub idp_mode: IdpMode,
    pub credentials: ClientCredentials,
    /// Effective issuer (public override applied).
    pub issuer: String,
    /// Authorization endpoint rewritten for browser reachability.
    pub browser_authorization_endpoint: String,
    pub verifier: TokenVerifier,
    /// Present only in exchange mode.
    pub exchanger: Option<TokenExchanger>,
}

/// Everything the routes share. Cheap to clone via `Arc`.
pub struct AppState {
    pub settings: Settings,
    pub mode: AuthMode,
    /// Always opened (webhook tracking works in every mode); encrypted
    /// operations additionally need the configured key.
    pub storage: TokenStorage,
    pub oauth: Option<OAuthState>,
    pub registry: ToolRegistry,
    pub rate_limiter: ProvisioningRateLimiter,
    /// Client for readiness probes and flow-side IdP calls.
    pub http: reqwest::Client,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("mode", &self.mode)
            .field("oauth", &self.oauth.is_some())
            .finish_non_exhaustive()
    }
}

/// Shared handle used in axum extractors.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Per-call upstream timeout.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.http_timeout_seconds)
    }

    /// Build the per-request upstream client from a resolved context.
    pub fn upstream_client(&self, auth: &RequestAuthContext) -> BridgeResult<NextcloudClient> {
        NextcloudClient::from_context(self.settings.host(), auth, self.upstream_timeout())
    }

    /// The authorization endpoint browsers should be sent to.
    pub fn browser_authorization_endpoint(&self) -> Option<&str> {
        self.oauth
            .as_ref()
            .map(|o| o.browser_authorization_endpoint.as_str())
    }
}
