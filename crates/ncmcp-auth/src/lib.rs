//! Authentication and credential core of the Nextcloud MCP bridge.
//!
//! This crate owns everything between an inbound `Authorization` header
//! and an upstream-ready credential: the encrypted SQLite store, OIDC
//! discovery and dynamic client registration, bearer-token verification,
//! RFC 8693 token exchange, the value-level pieces of the authorization
//! flows, and the provisioning rate limiter.

pub mod context;
pub mod crypto;
pub mod discovery;
pub mod exchange;
pub mod flows;
pub mod jwks;
pub mod rate_limit;
pub mod registration;
pub mod storage;
pub mod verifier;

pub use context::{parse_basic_header, preview_auth_header, RequestAuthContext};
pub use crypto::FieldCipher;
pub use discovery::{
    detect_idp_mode, fetch_discovery, normalize_url, rewrite_for_browser,
    validate_pkce_support, IdpMode, OidcDiscovery,
};
pub use exchange::TokenExchanger;
pub use flows::{DirectAuthorizeRequest, FlowError, PkcePair, TokenResponse};
pub use rate_limit::{ProvisioningRateLimiter, RateLimitDecision};
pub use registration::{resolve_client_credentials, ClientCredentials};
pub use storage::records::{
    FlowKind, FlowSession, NewFlowSession, RefreshTokenRecord, WebhookRegistration,
};
pub use storage::{FlowSessionUpdate, NewOAuthClient, TokenStorage};
pub use verifier::{TokenVerifier, VerifiedAccessToken, VerifierConfig};
