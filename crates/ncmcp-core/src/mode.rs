//! Operating-mode selection.
//!
//! The bridge serves three authentication postures from one process. The
//! mode is decided once at startup from configuration and carried as an
//! immutable value; nothing re-detects it per request.

use serde::{Deserialize, Serialize};

/// How inbound requests are authenticated and how upstream credentials are
/// obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// One fixed upstream `(username, password)` pair from configuration.
    SingleUserBasic,
    /// Credentials extracted from each request's `Authorization: Basic` header.
    MultiUserBasic,
    /// Inbound bearer tokens validated against the IdP; the bridge acts as an
    /// OAuth resource server.
    OAuthResourceServer,
}

impl AuthMode {
    /// True for both Basic variants.
    pub fn is_basic(self) -> bool {
        matches!(self, Self::SingleUserBasic | Self::MultiUserBasic)
    }

    /// True when bearer verification applies.
    pub fn is_oauth(self) -> bool {
        matches!(self, Self::OAuthResourceServer)
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SingleUserBasic => "single-user-basic",
            Self::MultiUserBasic => "multi-user-basic",
            Self::OAuthResourceServer => "oauth-resource-server",
        };
        f.write_str(name)
    }
}
