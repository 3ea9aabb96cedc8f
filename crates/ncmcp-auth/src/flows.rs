//! Authorization-flow building blocks.
//!
//! The HTTP layer owns the routes; everything here is value-level: request
//! validation for the direct client flow, authorize-URL construction for
//! all three flows, PKCE material, the code exchange at the IdP's token
//! endpoint, and ID-token claim extraction.

use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;
use url::Url;

use ncmcp_core::{BridgeError, BridgeResult};

/// Scopes every flow starts from.
pub const IDENTITY_SCOPES: &str = "openid profile email";
/// Scope set for server-mediated and browser flows.
pub const OFFLINE_SCOPES: &str = "openid profile email offline_access";

/// Query parameters of the direct (Flow A) authorize request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectAuthorizeRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// RFC 6749-shaped validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowError {
    pub error: &'static str,
    pub description: String,
    pub status: u16,
}

impl FlowError {
    fn invalid_request(description: impl Into<String>) -> Self {
        Self {
            error: "invalid_request",
            description: description.into(),
            status: 400,
        }
    }
}

/// Validate a Flow A request.
///
/// The redirect URI must be a localhost loopback (RFC 8252 native
/// clients), the challenge method must be S256, and the client must be in
/// the allow-list unless the DCR posture admits localhost clients.
pub fn validate_direct_authorize(
    request: &DirectAuthorizeRequest,
    allowed_clients: &[String],
    enable_dcr: bool,
) -> Result<(), FlowError> {
    if request.response_type.as_deref() != Some("code") {
        return Err(FlowError {
            error: "unsupported_response_type",
            description: "only the 'code' response_type is supported".into(),
            status: 400,
        });
    }

    let redirect_uri = request
        .redirect_uri
        .as_deref()
        .ok_or_else(|| FlowError::invalid_request("redirect_uri is required"))?;
    if !redirect_uri.starts_with("http://localhost:")
        && !redirect_uri.starts_with("http://127.0.0.1:")
    {
        return Err(FlowError::invalid_request(
            "redirect_uri must be a localhost loopback for native clients",
        ));
    }

    if request.state.as_deref().unwrap_or("").is_empty() {
        return Err(FlowError::invalid_request(
            "state parameter is required for CSRF protection",
        ));
    }
    if request.code_challenge.as_deref().unwrap_or("").is_empty() {
        return Err(FlowError::invalid_request("code_challenge is required (PKCE)"));
    }
    if request.code_challenge_method.as_deref().unwrap_or("S256") != "S256" {
        return Err(FlowError::invalid_request("code_challenge_method must be S256"));
    }

    let client_id = request
        .client_id
        .as_deref()
        .ok_or_else(|| FlowError::invalid_request("client_id is required"))?;
    if !allowed_clients.iter().any(|c| c == client_id) && !enable_dcr {
        return Err(FlowError {
            error: "unauthorized_client",
            description: format!("client '{client_id}' is not in the allow-list"),
            status: 401,
        });
    }

    Ok(())
}

fn with_params(endpoint: &str, params: &[(&str, &str)]) -> String {
    match Url::parse(endpoint) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(params.iter().copied());
            url.to_string()
        }
        Err(_) => endpoint.to_string(),
    }
}

/// Authorize URL for Flow A: the client's own identity, state, and PKCE
/// material pass straight through; the bridge never sees the callback.
pub fn direct_authorize_url(
    authorization_endpoint: &str,
    request: &DirectAuthorizeRequest,
    resource_scopes: &[String],
    mcp_resource: &str,
) -> String {
    let mut scope = IDENTITY_SCOPES.to_string();
    if !resource_scopes.is_empty() {
        scope.push(' ');
        scope.push_str(&resource_scopes.join(" "));
    }

    let url = with_params(
        authorization_endpoint,
        &[
            ("client_id", request.client_id.as_deref().unwrap_or_default()),
            ("redirect_uri", request.redirect_uri.as_deref().unwrap_or_default()),
            ("response_type", "code"),
            ("scope", &scope),
            ("state", request.state.as_deref().unwrap_or_default()),
            ("code_challenge", request.code_challenge.as_deref().unwrap_or_default()),
            ("code_challenge_method", "S256"),
            ("prompt", "consent"),
            ("resource", mcp_resource),
        ],
    );
    info!(
        client_id = request.client_id.as_deref().unwrap_or_default(),
        "direct flow: redirecting client straight to the IdP"
    );
    url
}

/// Authorize URL for Flow B: the bridge authenticates as itself and takes
/// the callback, asking for identity plus offline access.
pub fn provisioning_authorize_url(
    authorization_endpoint: &str,
    client_id: &str,
    callback_uri: &str,
    state: &str,
    resource_uri: &str,
) -> String {
    with_params(
        authorization_endpoint,
        &[
            ("client_id", client_id),
            ("redirect_uri", callback_uri),
            ("response_type", "code"),
            ("scope", OFFLINE_SCOPES),
            ("state", state),
            ("prompt", "consent"),
            ("access_type", "offline"),
            ("resource", resource_uri),
        ],
    )
}

/// Authorize URL for the browser admin-session flow (PKCE-protected).
pub fn browser_login_url(
    authorization_endpoint: &str,
    client_id: &str,
    callback_uri: &str,
    state: &str,
    code_challenge: &str,
) -> String {
    with_params(
        authorization_endpoint,
        &[
            ("client_id", client_id),
            ("redirect_uri", callback_uri),
            ("response_type", "code"),
            ("scope", OFFLINE_SCOPES),
            ("state", state),
            ("code_challenge", code_challenge),
            ("code_challenge_method", "S256"),
        ],
    )
}

/// PKCE verifier + S256 challenge.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a fresh PKCE pair.
pub fn generate_pkce() -> PkcePair {
    let mut bytes = [0u8; 48];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    let challenge = challenge_for_verifier(&verifier);
    PkcePair { verifier, challenge }
}

/// S256 challenge for an existing verifier.
pub fn challenge_for_verifier(verifier: &str) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Token-endpoint response for the authorization-code grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Granted scopes as a list.
    pub fn granted_scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Exchange an authorization code at the IdP's token endpoint.
///
/// # Errors
///
/// Non-2xx responses surface as `UpstreamHttp` with the IdP's status and
/// body so callback routes can show them.
pub async fn exchange_code(
    http: &reqwest::Client,
    token_endpoint: &str,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: &str,
    code_verifier: Option<&str>,
) -> BridgeResult<TokenResponse> {
    let mut form: Vec<(&str, &str)> = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];
    if let Some(verifier) = code_verifier {
        form.push(("code_verifier", verifier));
    }

    let response = http.post(token_endpoint).form(&form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BridgeError::UpstreamHttp {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| BridgeError::auth(format!("invalid token response from IdP: {e}")))
}

/// Claims the bridge reads out of an ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl IdTokenClaims {
    /// Display name: preferred username, then email, then subject.
    pub fn display_name(&self) -> Option<&str> {
        self.preferred_username
            .as_deref()
            .or(self.email.as_deref())
            .or(self.sub.as_deref())
    }
}

/// Decode an ID token's payload without signature verification.
///
/// The token arrives in the IdP's own token-endpoint response over TLS;
/// only the claims are needed here.
pub fn decode_id_token_claims(id_token: &str) -> Option<IdTokenClaims> {
    let payload = id_token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    serde_json::from_slice(&decoded).ok()
}

/// Random identifiers for sessions, states, and authorization codes.
pub fn random_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
