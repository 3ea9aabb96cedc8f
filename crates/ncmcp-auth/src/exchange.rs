//! RFC 8693 token exchange.
//!
//! In exchange mode the bridge trades an MCP-audienced inbound token for
//! an upstream-audienced one before every upstream call. Results are
//! cached by the SHA-256 of the inbound token for the lesser of the IdP's
//! `expires_in` and a configured maximum.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ncmcp_core::{BridgeError, BridgeResult};

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedExchange {
    access_token: String,
    expires_at: Instant,
}

/// Exchanges inbound tokens at the IdP's token endpoint.
pub struct TokenExchanger {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    /// Upstream resource URI sent as the `audience` parameter.
    audience: Option<String>,
    max_cache_ttl: Duration,
    cache: RwLock<HashMap<[u8; 32], CachedExchange>>,
}

impl std::fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchanger")
            .field("token_endpoint", &self.token_endpoint)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenExchanger {
    /// Build an exchanger for the given token endpoint and bridge identity.
    pub fn new(
        http: reqwest::Client,
        token_endpoint: String,
        client_id: String,
        client_secret: String,
        audience: Option<String>,
        max_cache_ttl: Duration,
    ) -> Self {
        info!(token_endpoint = %token_endpoint, audience = ?audience, "token exchange enabled");
        Self {
            http,
            token_endpoint,
            client_id,
            client_secret,
            audience,
            max_cache_ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Exchange `subject_token` for an upstream-audienced access token.
    ///
    /// # Errors
    ///
    /// Exchange failures surface as authentication errors; the caller maps
    /// them to 401.
    pub async fn exchange(&self, subject_token: &str) -> BridgeResult<String> {
        let digest: [u8; 32] = Sha256::digest(subject_token.as_bytes()).into();

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&digest) {
                if entry.expires_at > Instant::now() {
                    debug!("using cached exchanged token");
                    return Ok(entry.access_token.clone());
                }
            }
        }

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", GRANT_TYPE),
            ("subject_token", subject_token),
            ("subject_token_type", ACCESS_TOKEN_TYPE),
            ("requested_token_type", ACCESS_TOKEN_TYPE),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];
        if let Some(audience) = &self.audience {
            form.push(("audience", audience));
        }

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| BridgeError::auth(format!("token exchange request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "token exchange rejected");
            return Err(BridgeError::auth(format!(
                "token exchange failed with status {status}"
            )));
        }

        let exchanged: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::auth(format!("invalid token exchange response: {e}")))?;

        let ttl = exchanged
            .expires_in
            .map(Duration::from_secs)
            .map_or(self.max_cache_ttl, |d| d.min(self.max_cache_ttl));

        let mut cache = self.cache.write().await;
        cache.insert(
            digest,
            CachedExchange {
                access_token: exchanged.access_token.clone(),
                expires_at: Instant::now() + ttl,
            },
        );

        debug!(ttl_secs = ttl.as_secs(), "exchanged token cached");
        Ok(exchanged.access_token)
    }

    /// Drop all cached exchanges.
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn exchanger(endpoint: String, max_ttl: Duration) -> TokenExchanger {
        TokenExchanger::new(
            reqwest::Client::new(),
            endpoint,
            "bridge-client".into(),
            "bridge-secret".into(),
            Some("https://cloud.example.com".into()),
            max_ttl,
        )
    }

    #[tokio::test]
    async fn exchange_posts_rfc8693_grant_and_caches() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange",
            ))
            .and(body_string_contains("subject_token=inbound-token"))
            .and(body_string_contains("audience=https%3A%2F%2Fcloud.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "upstream-token",
                "issued_token_type": ACCESS_TOKEN_TYPE,
                "token_type": "Bearer",
                "expires_in": 300,
            })))
            .expect(1)
            .mount(&idp)
            .await;

        let exchanger = exchanger(format!("{}/token", idp.uri()), Duration::from_secs(3600));
        assert_eq!(exchanger.exchange("inbound-token").await.unwrap(), "upstream-token");
        // Served from cache; expect(1) guards against a second POST.
        assert_eq!(exchanger.exchange("inbound-token").await.unwrap(), "upstream-token");
    }

    #[tokio::test]
    async fn cache_ttl_is_capped_by_configured_maximum() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "upstream-token",
                "expires_in": 86400,
            })))
            .expect(2)
            .mount(&idp)
            .await;

        // A zero maximum means every exchange misses the cache.
        let exchanger = exchanger(format!("{}/token", idp.uri()), Duration::ZERO);
        exchanger.exchange("inbound").await.unwrap();
        exchanger.exchange("inbound").await.unwrap();
    }

    #[tokio::test]
    async fn idp_rejection_is_an_auth_error() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
            })))
            .mount(&idp)
            .await;

        let exchanger = exchanger(format!("{}/token", idp.uri()), Duration::from_secs(60));
        let err = exchanger.exchange("inbound").await.unwrap_err();
        assert!(matches!(err, BridgeError::Auth(_)));
    }
}
