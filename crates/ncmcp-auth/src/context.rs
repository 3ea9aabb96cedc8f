//! Per-request authentication context.
//!
//! One value per inbound request, produced by the mode resolver and
//! consumed when building the upstream client: either a Basic credential
//! pair or a verified bearer plus the token the upstream should see.

use base64::Engine;

use crate::verifier::VerifiedAccessToken;

/// Resolved credentials for one inbound request.
#[derive(Debug, Clone)]
pub enum RequestAuthContext {
    /// Fixed or extracted upstream `(username, password)` pair.
    Basic { username: String, password: String },
    /// Verified inbound token plus the upstream-bound bearer (the same
    /// token in multi-audience mode, an exchanged one otherwise).
    Bearer {
        token: VerifiedAccessToken,
        upstream_token: String,
    },
}

impl RequestAuthContext {
    /// Principal for logging and per-user storage.
    pub fn principal(&self) -> &str {
        match self {
            Self::Basic { username, .. } => username,
            Self::Bearer { token, .. } => &token.principal,
        }
    }

    /// The caller's verified scopes; `None` in Basic modes, where no
    /// scope filtering applies.
    pub fn scopes(&self) -> Option<&[String]> {
        match self {
            Self::Basic { .. } => None,
            Self::Bearer { token, .. } => Some(&token.scopes),
        }
    }
}

/// Parse an `Authorization: Basic` header value.
///
/// The decoded pair is split at the *first* colon only, so passwords
/// containing colons survive verbatim. Anything malformed is `None`.
pub fn parse_basic_header(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    if username.is_empty() {
        return None;
    }
    Some((username.to_string(), password.to_string()))
}

/// Preview of an Authorization header for the debug trail.
///
/// Values of at most 50 characters are logged verbatim; longer ones are
/// truncated.
pub fn preview_auth_header(value: &str) -> String {
    if value.len() <= 50 {
        value.to_string()
    } else {
        format!("{}...", &value[..50])
    }
}
