//! Inbound bearer-token verification.
//!
//! Two validation paths, chosen per token: JWTs (three dot-separated
//! parts, when a JWKS client is configured) are signature-checked against
//! the IdP's keys; anything else goes through RFC 7662 introspection with
//! the bridge's own client credentials.
//!
//! Per RFC 7519 the bridge validates only its *own* presence in the `aud`
//! claim; the upstream's audience is the upstream's problem. The rule is
//! the same in multi-audience and token-exchange sub-modes.
//!
//! Every failure path returns `None`: expired, bad signature, wrong
//! issuer, inactive introspection, missing claims, and network or
//! configuration errors all fail closed at the protocol layer.

use std::collections::HashMap;

use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::jwks::JwksClient;

/// Default cache lifetime when a token carries no `exp` claim.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// A validated inbound access token.
#[derive(Debug, Clone)]
pub struct VerifiedAccessToken {
    /// The raw bearer value, needed for pass-through or exchange.
    pub token: String,
    /// `client_id` claim, empty when the IdP omits it.
    pub client_id: String,
    /// Scopes from the space-separated `scope` claim. An absent claim is
    /// the empty set, which disables every scope-gated tool.
    pub scopes: Vec<String>,
    /// Unix expiry used by the cache and downstream checks.
    pub expires_at: i64,
    /// Resolved principal: `sub`, falling back to `preferred_username`.
    pub principal: String,
}

impl VerifiedAccessToken {
    /// Whether the token's scope set covers `required`.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.scopes.contains(s))
    }
}

/// Static inputs for the verifier.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Expected issuer; validated on the JWT path when set.
    pub issuer: Option<String>,
    /// The bridge's own client id (an accepted audience).
    pub client_id: String,
    /// Client secret for introspection authentication.
    pub client_secret: Option<String>,
    /// The bridge's public URL (an accepted audience, also with `/mcp`).
    pub server_url: String,
    /// RFC 7662 endpoint for opaque tokens.
    pub introspection_endpoint: Option<String>,
}

/// Validates inbound bearers via JWT+JWKS or introspection.
pub struct TokenVerifier {
    config: VerifierConfig,
    jwks: Option<JwksClient>,
    http: reqwest::Client,
    cache: RwLock<HashMap<[u8; 32], VerifiedAccessToken>>,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("client_id", &self.config.client_id)
            .field("jwt_enabled", &self.jwks.is_some())
            .field(
                "introspection_enabled",
                &self.config.introspection_endpoint.is_some(),
            )
            .finish_non_exhaustive()
    }
}

fn token_digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

impl TokenVerifier {
    /// Build a verifier. `jwks` enables the JWT path.
    pub fn new(config: VerifierConfig, jwks: Option<JwksClient>, http: reqwest::Client) -> Self {
        info!(
            client_id = %config.client_id,
            server_url = %config.server_url,
            jwt = jwks.is_some(),
            introspection = config.introspection_endpoint.is_some(),
            "token verifier initialized"
        );
        Self {
            config,
            jwks,
            http,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Verify an inbound bearer token. `None` means authentication fails.
    pub async fn verify(&self, token: &str) -> Option<VerifiedAccessToken> {
        if let Some(cached) = self.cached(token).await {
            debug!("token verified from cache");
            metrics::counter!("ncmcp_token_cache_total", "hit" => "true").increment(1);
            return Some(cached);
        }
        metrics::counter!("ncmcp_token_cache_total", "hit" => "false").increment(1);

        let (method, payload) = if is_jwt_format(token) && self.jwks.is_some() {
            ("jwt", self.verify_jwt(token).await)
        } else {
            ("introspect", self.introspect(token).await)
        };

        let Some(payload) = payload else {
            metrics::counter!("ncmcp_token_validation_total", "method" => method, "outcome" => "invalid")
                .increment(1);
            return None;
        };

        if !self.has_mcp_audience(&payload) {
            error!(
                aud = %payload.get("aud").cloned().unwrap_or_default(),
                client_id = %self.config.client_id,
                server_url = %self.config.server_url,
                "token rejected: no MCP audience"
            );
            metrics::counter!("ncmcp_token_validation_total", "method" => method, "outcome" => "invalid")
                .increment(1);
            return None;
        }

        let verified = self.build_verified(token, &payload)?;
        metrics::counter!("ncmcp_token_validation_total", "method" => method, "outcome" => "valid")
            .increment(1);

        let mut cache = self.cache.write().await;
        cache.insert(token_digest(token), verified.clone());
        Some(verified)
    }

    /// Drop all cached verifications.
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn cached(&self, token: &str) -> Option<VerifiedAccessToken> {
        let digest = token_digest(token);
        let now = Utc::now().timestamp();
        {
            let cache = self.cache.read().await;
            match cache.get(&digest) {
                Some(entry) if entry.expires_at > now => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Entry exists but expired.
        self.cache.write().await.remove(&digest);
        None
    }

    async fn verify_jwt(&self, token: &str) -> Option<serde_json::Value> {
        let jwks = self.jwks.as_ref()?;

        let header = match decode_header(token) {
            Ok(h) => h,
            Err(e) => {
                debug!(error = %e, "could not decode JWT header");
                return None;
            }
        };
        let kid = match header.kid {
            Some(kid) => kid,
            None => {
                warn!("JWT has no kid header");
                return None;
            }
        };

        let jwk = match jwks.find_key(&kid).await {
            Ok(Some(jwk)) => jwk,
            Ok(None) => {
                warn!(kid, "no JWKS key for kid");
                return None;
            }
            Err(e) => {
                error!(error = %e, "JWKS fetch failed");
                return None;
            }
        };
        let decoding_key = match DecodingKey::from_jwk(&jwk) {
            Ok(k) => k,
            Err(e) => {
                error!(kid, error = %e, "unusable JWK");
                return None;
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        // Audience is checked separately; the rule depends on our own
        // identity, not on a single expected value.
        validation.validate_aud = false;
        validation.leeway = 60;
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }

        match decode::<serde_json::Value>(token, &decoding_key, &validation) {
            Ok(data) => {
                debug!(sub = %data.claims.get("sub").cloned().unwrap_or_default(), "JWT signature verified");
                Some(data.claims)
            }
            Err(e) => {
                info!(error = %e, "JWT validation failed");
                None
            }
        }
    }

    async fn introspect(&self, token: &str) -> Option<serde_json::Value> {
        let endpoint = match &self.config.introspection_endpoint {
            Some(e) => e,
            None => {
                debug!("no introspection endpoint configured");
                return None;
            }
        };
        let secret = self.config.client_secret.as_deref()?;

        let response = self
            .http
            .post(endpoint)
            .basic_auth(&self.config.client_id, Some(secret))
            .form(&[("token", token)])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "introspection request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "introspection returned non-success");
            return None;
        }

        let payload: serde_json::Value = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "introspection response was not JSON");
                return None;
            }
        };

        if payload.get("active").and_then(serde_json::Value::as_bool) != Some(true) {
            info!("introspection returned active=false");
            return None;
        }
        debug!(sub = %payload.get("sub").cloned().unwrap_or_default(), "token introspected");
        Some(payload)
    }

    /// The token must carry at least one of: the bridge's client id, the
    /// bridge's public URL, or that URL suffixed with `/mcp`.
    fn has_mcp_audience(&self, payload: &serde_json::Value) -> bool {
        let audiences: Vec<&str> = match payload.get("aud") {
            Some(serde_json::Value::String(s)) => vec![s.as_str()],
            Some(serde_json::Value::Array(items)) => {
                items.iter().filter_map(|v| v.as_str()).collect()
            }
            _ => Vec::new(),
        };

        let mcp_suffixed = format!("{}/mcp", self.config.server_url);
        audiences.iter().any(|aud| {
            *aud == self.config.client_id
                || *aud == self.config.server_url
                || *aud == mcp_suffixed
        })
    }

    fn build_verified(
        &self,
        token: &str,
        payload: &serde_json::Value,
    ) -> Option<VerifiedAccessToken> {
        let principal = payload
            .get("sub")
            .and_then(|v| v.as_str())
            .or_else(|| payload.get("preferred_username").and_then(|v| v.as_str()));
        let Some(principal) = principal else {
            error!("token payload has neither sub nor preferred_username");
            return None;
        };

        let scopes = payload
            .get("scope")
            .and_then(|v| v.as_str())
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let expires_at = payload
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_else(|| {
                warn!("token has no exp claim, applying default TTL");
                Utc::now().timestamp() + DEFAULT_TOKEN_TTL_SECS
            });

        Some(VerifiedAccessToken {
            token: token.to_string(),
            client_id: payload
                .get("client_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            scopes,
            expires_at,
            principal: principal.to_string(),
        })
    }
}

/// Three dot-separated parts.
pub fn is_jwt_format(token: &str) -> bool {
    token.split('.').count() == 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server_url: &str, introspection: Option<String>) -> VerifierConfig {
        VerifierConfig {
            issuer: None,
            client_id: "bridge-client".into(),
            client_secret: Some("bridge-secret".into()),
            server_url: server_url.to_string(),
            introspection_endpoint: introspection,
        }
    }

    fn verifier_with_introspection(endpoint: String) -> TokenVerifier {
        TokenVerifier::new(
            config("http://localhost:8000", Some(endpoint)),
            None,
            reqwest::Client::new(),
        )
    }

    #[test]
    fn jwt_format_detection() {
        assert!(is_jwt_format("aaa.bbb.ccc"));
        assert!(!is_jwt_format("opaque-token"));
        assert!(!is_jwt_format("a.b"));
        assert!(!is_jwt_format("a.b.c.d"));
    }

    #[tokio::test]
    async fn introspected_active_token_with_mcp_audience_verifies() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .and(body_string_contains("token=opaque-alpha"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "sub": "alice",
                "aud": ["bridge-client", "nextcloud"],
                "scope": "openid notes:read",
                "client_id": "mcp-client-abc",
                "exp": Utc::now().timestamp() + 600,
            })))
            .mount(&idp)
            .await;

        let verifier = verifier_with_introspection(format!("{}/introspect", idp.uri()));
        let verified = verifier.verify("opaque-alpha").await.unwrap();
        assert_eq!(verified.principal, "alice");
        assert_eq!(verified.scopes, vec!["openid", "notes:read"]);
        assert_eq!(verified.client_id, "mcp-client-abc");
    }

    #[tokio::test]
    async fn token_without_mcp_audience_is_rejected_on_every_path() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "sub": "alice",
                "aud": "nextcloud",
                "exp": Utc::now().timestamp() + 600,
            })))
            .mount(&idp)
            .await;

        let verifier = verifier_with_introspection(format!("{}/introspect", idp.uri()));
        assert!(verifier.verify("opaque-beta").await.is_none());
    }

    #[tokio::test]
    async fn inactive_introspection_fails_closed() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"active": false})),
            )
            .mount(&idp)
            .await;

        let verifier = verifier_with_introspection(format!("{}/introspect", idp.uri()));
        assert!(verifier.verify("opaque-gamma").await.is_none());
    }

    #[tokio::test]
    async fn unreachable_introspection_fails_closed() {
        let verifier =
            verifier_with_introspection("http://127.0.0.1:1/introspect".to_string());
        assert!(verifier.verify("opaque-delta").await.is_none());
    }

    #[tokio::test]
    async fn cache_returns_token_without_second_network_call() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "sub": "alice",
                "aud": "bridge-client",
                "exp": Utc::now().timestamp() + 600,
            })))
            .expect(1)
            .mount(&idp)
            .await;

        let verifier = verifier_with_introspection(format!("{}/introspect", idp.uri()));
        assert!(verifier.verify("opaque-epsilon").await.is_some());
        assert!(verifier.verify("opaque-epsilon").await.is_some());
    }

    #[tokio::test]
    async fn cache_never_returns_an_expired_token() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "sub": "alice",
                "aud": "bridge-client",
                "exp": Utc::now().timestamp() + 1,
            })))
            .mount(&idp)
            .await;

        let verifier = verifier_with_introspection(format!("{}/introspect", idp.uri()));
        assert!(verifier.verify("opaque-zeta").await.is_some());

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        // Expired in cache; the re-introspected token also reads as expired,
        // but a fresh verification result from the IdP is still accepted.
        assert!(verifier.cached("opaque-zeta").await.is_none());
    }

    #[tokio::test]
    async fn missing_scope_claim_means_empty_scope_set() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "sub": "alice",
                "aud": "bridge-client",
                "exp": Utc::now().timestamp() + 600,
            })))
            .mount(&idp)
            .await;

        let verifier = verifier_with_introspection(format!("{}/introspect", idp.uri()));
        let verified = verifier.verify("opaque-eta").await.unwrap();
        assert!(verified.scopes.is_empty());
        assert!(!verified.has_scopes(&["notes:read".to_string()]));
        assert!(verified.has_scopes(&[]));
    }
}
