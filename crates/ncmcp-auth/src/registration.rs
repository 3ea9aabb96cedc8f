//! Dynamic client registration (RFC 7591/7592) and credential resolution.
//!
//! Client credentials are resolved in priority order: configured static
//! values, an unexpired persisted registration, then dynamic registration
//! against the IdP. No path succeeding is a startup failure.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ncmcp_core::{BridgeError, BridgeResult, Settings};

use crate::discovery::OidcDiscovery;
use crate::storage::{NewOAuthClient, TokenStorage};

/// RFC 7591 registration request, plus the provider's `token_type` and
/// RFC 8707 `resource` extensions.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    /// Space-separated scope universe advertised for this resource.
    pub scope: String,
    /// `Bearer` or `jwt`.
    pub token_type: String,
    /// RFC 8707 resource identifier: the bridge's public MCP endpoint.
    pub resource: String,
}

/// RFC 7591 registration response.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_id_issued_at: Option<i64>,
    /// Seconds since epoch; `0` means never.
    #[serde(default)]
    pub client_secret_expires_at: Option<i64>,
    /// RFC 7592 management token. Some IdPs never issue one; that is fine.
    #[serde(default)]
    pub registration_access_token: Option<String>,
    #[serde(default)]
    pub registration_client_uri: Option<String>,
}

/// Resolved credentials the bridge authenticates to the IdP with.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// POST a registration request to the IdP.
pub async fn register_client(
    http: &reqwest::Client,
    registration_endpoint: &str,
    request: &RegistrationRequest,
) -> BridgeResult<RegistrationResponse> {
    info!(endpoint = registration_endpoint, client_name = %request.client_name, "registering OAuth client dynamically");
    let response = http
        .post(registration_endpoint)
        .json(request)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BridgeError::config(format!(
            "dynamic client registration failed: {status}: {body}"
        )));
    }

    let registered: RegistrationResponse = response.json().await.map_err(|e| {
        BridgeError::config(format!("invalid registration response from IdP: {e}"))
    })?;

    if registered.registration_access_token.is_none() {
        // RFC 7592 deletion will not be possible; continue anyway.
        info!(
            client_id = %registered.client_id,
            "IdP issued no registration_access_token; client management disabled"
        );
    }

    Ok(registered)
}

/// Build the registration payload for this bridge.
pub fn registration_request(
    settings: &Settings,
    advertised_scopes: &[String],
) -> RegistrationRequest {
    let token_type = if settings.oidc_token_type.eq_ignore_ascii_case("jwt") {
        // The provider checks for the lowercase form.
        "jwt".to_string()
    } else {
        "Bearer".to_string()
    };

    let mut scope = format!("openid profile email {}", advertised_scopes.join(" "));
    if settings.enable_offline_access {
        scope.push_str(" offline_access");
    }

    RegistrationRequest {
        client_name: format!("Nextcloud MCP Bridge ({token_type})"),
        redirect_uris: vec![format!("{}/oauth/callback", settings.server_url())],
        grant_types: vec!["authorization_code".into(), "refresh_token".into()],
        response_types: vec!["code".into()],
        scope: scope.trim().to_string(),
        token_type,
        resource: settings.mcp_resource(),
    }
}

/// Resolve client credentials: env, then storage, then DCR.
///
/// `storage` is optional because Basic-mode deployments may run without an
/// encryption key; without it the persisted path is skipped.
pub async fn resolve_client_credentials(
    settings: &Settings,
    storage: Option<&TokenStorage>,
    http: &reqwest::Client,
    discovery: &OidcDiscovery,
    advertised_scopes: &[String],
) -> BridgeResult<ClientCredentials> {
    if let (Some(id), Some(secret)) = (
        settings.oidc_client_id.as_deref(),
        settings.oidc_client_secret.as_deref(),
    ) {
        info!(client_id = id, "using static OIDC client credentials");
        return Ok(ClientCredentials {
            client_id: id.to_string(),
            client_secret: secret.to_string(),
        });
    }

    if let Some(storage) = storage.filter(|s| s.has_cipher()) {
        match storage.get_oauth_client().await {
            Ok(Some(persisted)) => {
                info!(client_id = %persisted.client_id, "reusing persisted OAuth client credentials");
                return Ok(ClientCredentials {
                    client_id: persisted.client_id,
                    client_secret: persisted.client_secret,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read persisted OAuth client, continuing"),
        }
    }

    if let Some(registration_endpoint) = discovery.registration_endpoint.as_deref() {
        let request = registration_request(settings, advertised_scopes);
        let registered = register_client(http, registration_endpoint, &request).await?;
        let client_secret = registered.client_secret.clone().ok_or_else(|| {
            BridgeError::config("IdP registered a public client; the bridge needs a confidential one")
        })?;

        if let Some(storage) = storage.filter(|s| s.has_cipher()) {
            storage
                .store_oauth_client(&NewOAuthClient {
                    client_id: &registered.client_id,
                    client_secret: &client_secret,
                    client_id_issued_at: registered.client_id_issued_at,
                    client_secret_expires_at: registered.client_secret_expires_at,
                    redirect_uris: &request.redirect_uris,
                    registration_access_token: registered.registration_access_token.as_deref(),
                    registration_client_uri: registered.registration_client_uri.as_deref(),
                })
                .await?;
        } else {
            warn!("no encrypted storage available; registered credentials will not survive restart");
        }

        return Ok(ClientCredentials {
            client_id: registered.client_id,
            client_secret,
        });
    }

    Err(BridgeError::config(
        "no OAuth client credentials could be resolved. The bridge needs one of:\n\
         1. oidc_client_id and oidc_client_secret in the environment, or\n\
         2. previously persisted credentials in the token store (requires token_encryption_key), or\n\
         3. an IdP that advertises a registration_endpoint for dynamic client registration",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldCipher;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(host: &str) -> Settings {
        serde_json::from_value(serde_json::json!({
            "nextcloud_host": host,
            "mcp_server_url": "http://localhost:8000",
        }))
        .unwrap()
    }

    fn discovery_with_registration(endpoint: Option<String>) -> OidcDiscovery {
        serde_json::from_value(serde_json::json!({
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/authorize",
            "token_endpoint": "https://idp.example.com/token",
            "registration_endpoint": endpoint,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn static_credentials_win() {
        let mut s = settings("https://cloud.example.com");
        s.oidc_client_id = Some("static-id".into());
        s.oidc_client_secret = Some("static-secret".into());

        let creds = resolve_client_credentials(
            &s,
            None,
            &reqwest::Client::new(),
            &discovery_with_registration(None),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(creds.client_id, "static-id");
    }

    #[tokio::test]
    async fn no_path_available_is_a_config_error() {
        let s = settings("https://cloud.example.com");
        let err = resolve_client_credentials(
            &s,
            None,
            &reqwest::Client::new(),
            &discovery_with_registration(None),
            &[],
        )
        .await
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("oidc_client_id"));
        assert!(message.contains("registration_endpoint"));
    }

    #[tokio::test]
    async fn dynamic_registration_persists_and_reuses() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .and(body_partial_json(serde_json::json!({
                "redirect_uris": ["http://localhost:8000/oauth/callback"],
                "grant_types": ["authorization_code", "refresh_token"],
                "response_types": ["code"],
                "token_type": "Bearer",
                "resource": "http://localhost:8000/mcp",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "client_id": "dcr-client",
                "client_secret": "dcr-secret",
                "client_id_issued_at": 1_700_000_000,
                "client_secret_expires_at": 0,
            })))
            .expect(1)
            .mount(&idp)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let storage = TokenStorage::open_at(
            &dir.path().join("tokens.db"),
            Some(&FieldCipher::generate_key_base64()),
        )
        .await
        .unwrap();

        let s = settings("https://cloud.example.com");
        let discovery = discovery_with_registration(Some(format!("{}/register", idp.uri())));
        let http = reqwest::Client::new();

        let first = resolve_client_credentials(&s, Some(&storage), &http, &discovery, &[
            "notes:read".to_string(),
        ])
        .await
        .unwrap();
        assert_eq!(first.client_id, "dcr-client");

        // Second resolution reuses the persisted row; the mock's expect(1)
        // fails the test if registration happens again.
        let second = resolve_client_credentials(&s, Some(&storage), &http, &discovery, &[])
            .await
            .unwrap();
        assert_eq!(second.client_id, "dcr-client");
        assert_eq!(second.client_secret, "dcr-secret");
    }

    #[test]
    fn registration_request_includes_offline_access_when_enabled() {
        let mut s = settings("https://cloud.example.com");
        s.enable_offline_access = true;
        let req = registration_request(&s, &["notes:read".to_string()]);
        assert!(req.scope.contains("offline_access"));
        assert!(req.scope.starts_with("openid profile email"));
        assert_eq!(req.resource, "http://localhost:8000/mcp");
    }

    #[test]
    fn jwt_token_type_is_lowercased() {
        let mut s = settings("https://cloud.example.com");
        s.oidc_token_type = "JWT".into();
        assert_eq!(registration_request(&s, &[]).token_type, "jwt");
        s.oidc_token_type = "bearer".into();
        assert_eq!(registration_request(&s, &[]).token_type, "Bearer");
    }
}
