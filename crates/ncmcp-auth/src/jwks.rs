//! JWKS fetching with TTL-based caching.
//!
//! Keys are cached for ten minutes; a lookup miss forces one refresh so
//! key rotation is picked up without restarting the bridge.

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ncmcp_core::{BridgeError, BridgeResult};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedJwks {
    fn is_valid(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

/// Client for one JWKS endpoint.
#[derive(Debug)]
pub struct JwksClient {
    jwks_uri: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
    cache_ttl: Duration,
}

impl JwksClient {
    /// Create a client with the default ten-minute cache.
    pub fn new(jwks_uri: String, http: reqwest::Client) -> Self {
        Self {
            jwks_uri,
            http,
            cache: RwLock::new(None),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// The endpoint this client fetches from.
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Get the key set, from cache when fresh.
    pub async fn get_jwks(&self) -> BridgeResult<JwkSet> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    debug!(jwks_uri = %self.jwks_uri, "using cached JWKS");
                    return Ok(cached.jwks.clone());
                }
            }
        }
        self.fetch_and_cache().await
    }

    /// Find the signing key for a `kid`, refreshing once on a miss.
    pub async fn find_key(&self, kid: &str) -> BridgeResult<Option<Jwk>> {
        let jwks = self.get_jwks().await?;
        if let Some(key) = jwks.find(kid) {
            return Ok(Some(key.clone()));
        }

        // Unknown kid usually means the IdP rotated keys under us.
        warn!(kid, jwks_uri = %self.jwks_uri, "kid not in cached JWKS, refreshing");
        let refreshed = self.fetch_and_cache().await?;
        Ok(refreshed.find(kid).cloned())
    }

    async fn fetch_and_cache(&self) -> BridgeResult<JwkSet> {
        let response = self.http.get(&self.jwks_uri).send().await?;
        if !response.status().is_success() {
            return Err(BridgeError::auth(format!(
                "JWKS endpoint {} returned {}",
                self.jwks_uri,
                response.status()
            )));
        }
        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| BridgeError::auth(format!("invalid JWKS document: {e}")))?;

        info!(jwks_uri = %self.jwks_uri, key_count = jwks.keys.len(), "fetched JWKS");

        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            jwks: jwks.clone(),
            cached_at: Instant::now(),
            ttl: self.cache_ttl,
        });
        Ok(jwks)
    }

    /// Drop the cached key set.
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }
}
