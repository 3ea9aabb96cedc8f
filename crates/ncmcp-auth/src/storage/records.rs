//! Row types for the credential store.

use serde::{Deserialize, Serialize};

/// Which authorization flow produced a stored refresh token or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowKind {
    /// The AI client authenticated against the IdP directly.
    Direct,
    /// The bridge drove the authorization itself for offline access.
    ServerMediated,
    /// Both tracks completed for the same user.
    Hybrid,
}

impl FlowKind {
    /// Stable column value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::ServerMediated => "server-mediated",
            Self::Hybrid => "hybrid",
        }
    }

    /// Parse a column value, defaulting unknown history to `Direct`.
    pub fn from_column(value: &str) -> Self {
        match value {
            "server-mediated" => Self::ServerMediated,
            "hybrid" => Self::Hybrid,
            _ => Self::Direct,
        }
    }
}

/// A decrypted refresh-token row. Exactly one per user.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub user_id: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
    pub flow: FlowKind,
    pub token_audience: Option<String>,
    pub provisioned_at: Option<i64>,
    pub provisioning_client_id: Option<String>,
    pub scopes: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The bridge's own registered OAuth client (single row, decrypted).
#[derive(Debug, Clone)]
pub struct OAuthClientRecord {
    pub client_id: String,
    pub client_secret: String,
    pub client_id_issued_at: Option<i64>,
    /// Seconds since epoch; `0` means the secret never expires.
    pub client_secret_expires_at: Option<i64>,
    pub redirect_uris: Vec<String>,
    /// RFC 7592 management token, when the IdP issued one.
    pub registration_access_token: Option<String>,
    pub registration_client_uri: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Value-only state for an in-progress authorization flow.
#[derive(Debug, Clone)]
pub struct FlowSession {
    pub session_id: String,
    pub client_id: Option<String>,
    pub client_redirect_uri: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub mcp_authorization_code: Option<String>,
    pub idp_access_token: Option<String>,
    pub idp_refresh_token: Option<String>,
    pub user_id: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub flow: FlowKind,
    pub requested_scopes: Vec<String>,
    pub granted_scopes: Vec<String>,
    pub is_provisioning: bool,
}

/// Fields the caller supplies when opening a flow session.
#[derive(Debug, Clone, Default)]
pub struct NewFlowSession {
    pub session_id: String,
    pub client_id: Option<String>,
    pub client_redirect_uri: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub flow: Option<FlowKind>,
    pub requested_scopes: Vec<String>,
    pub is_provisioning: bool,
}

/// An upstream webhook the bridge registered.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRegistration {
    pub webhook_id: i64,
    pub preset_id: String,
    pub created_at: f64,
}

pub(crate) fn scopes_to_column(scopes: &[String]) -> Option<String> {
    if scopes.is_empty() {
        None
    } else {
        serde_json::to_string(scopes).ok()
    }
}

pub(crate) fn scopes_from_column(value: Option<String>) -> Vec<String> {
    value
        .and_then(|v| serde_json::from_str(&v).ok())
        .unwrap_or_default()
}
