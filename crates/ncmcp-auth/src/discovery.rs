//! OIDC discovery and provider-mode detection.
//!
//! At startup the bridge fetches the IdP's well-known configuration,
//! checks the PKCE advertisement MCP clients depend on, and decides
//! whether the IdP is the upstream itself (integrated) or a separate
//! deployment (external).

use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use ncmcp_core::{BridgeError, BridgeResult};

/// The subset of the OIDC discovery document the bridge uses.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcDiscovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

/// Whether the IdP and the upstream are the same deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdpMode {
    /// The upstream hosts the OIDC endpoints.
    Integrated,
    /// A distinct OIDC provider fronts authentication.
    External,
}

/// Fetch and parse the discovery document.
pub async fn fetch_discovery(
    http: &reqwest::Client,
    discovery_url: &str,
) -> BridgeResult<OidcDiscovery> {
    info!(url = discovery_url, "performing OIDC discovery");
    let response = http.get(discovery_url).send().await?;
    if !response.status().is_success() {
        return Err(BridgeError::config(format!(
            "OIDC discovery at {discovery_url} returned {}",
            response.status()
        )));
    }
    let discovery: OidcDiscovery = response.json().await.map_err(|e| {
        BridgeError::config(format!("invalid OIDC discovery document at {discovery_url}: {e}"))
    })?;
    info!(issuer = %discovery.issuer, "OIDC discovery successful");
    Ok(discovery)
}

/// Check the PKCE advertisement MCP clients require.
///
/// Per RFC 8414, an absent `code_challenge_methods_supported` means the
/// authorization server does not support PKCE; clients that insist on S256
/// will refuse the provider. This is a warning, never a startup failure.
pub fn validate_pkce_support(discovery: &OidcDiscovery, discovery_url: &str) {
    match &discovery.code_challenge_methods_supported {
        None => {
            warn!("================================================================");
            warn!("OIDC configuration problem: missing PKCE support advertisement");
            warn!(url = discovery_url, "discovery document has no code_challenge_methods_supported");
            warn!("Per RFC 8414 this means the server does NOT support PKCE.");
            warn!("MCP clients requiring S256 will reject this provider.");
            warn!("Enable PKCE on the provider and ensure discovery advertises it.");
            warn!("================================================================");
        }
        Some(methods) if !methods.iter().any(|m| m == "S256") => {
            warn!("================================================================");
            warn!("OIDC configuration problem: S256 challenge method not advertised");
            warn!(url = discovery_url, advertised = ?methods, "per RFC 8414");
            warn!("MCP clients require the S256 code challenge method.");
            warn!("================================================================");
        }
        Some(methods) => {
            info!(methods = ?methods, "PKCE support validated");
        }
    }
}

/// Reduce a URL to `scheme://host[:port]`, dropping the path and any
/// default port.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            // `Url::port` is already None for scheme-default ports.
            match url.port() {
                Some(port) => format!("{}://{host}:{port}", url.scheme()),
                None => format!("{}://{host}", url.scheme()),
            }
        }
        Err(_) => raw.trim_end_matches('/').to_string(),
    }
}

/// Decide integrated vs external by normalized prefix match.
pub fn detect_idp_mode(issuer: &str, nextcloud_host: &str) -> IdpMode {
    let issuer_normalized = normalize_url(issuer);
    let host_normalized = normalize_url(nextcloud_host);
    if issuer_normalized.starts_with(&host_normalized) {
        info!(issuer, "Detected integrated IdP mode");
        IdpMode::Integrated
    } else {
        info!(issuer, host = nextcloud_host, "Detected external IdP mode");
        IdpMode::External
    }
}

/// Rewrite an IdP endpoint from an internal host to a browser-reachable
/// one, preserving path and query.
///
/// The discovery document may advertise container-internal hostnames
/// (`http://app/apps/oidc/authorize`) that a browser cannot resolve; when a
/// public issuer URL is configured and the endpoint sits on the internal
/// host, the authority is swapped out.
pub fn rewrite_for_browser(
    endpoint: &str,
    internal_host: &str,
    public_issuer: Option<&str>,
) -> String {
    let Some(public) = public_issuer else {
        return endpoint.to_string();
    };
    let (Ok(endpoint_url), Ok(internal_url), Ok(public_url)) = (
        Url::parse(endpoint),
        Url::parse(internal_host),
        Url::parse(public.trim_end_matches('/')),
    ) else {
        return endpoint.to_string();
    };

    if endpoint_url.host_str() != internal_url.host_str() {
        return endpoint.to_string();
    }

    let authority = match public_url.port() {
        Some(port) => format!("{}:{port}", public_url.host_str().unwrap_or_default()),
        None => public_url.host_str().unwrap_or_default().to_string(),
    };
    let mut rewritten = format!(
        "{}://{}{}",
        public_url.scheme(),
        authority,
        endpoint_url.path()
    );
    if let Some(query) = endpoint_url.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    info!(from = endpoint, to = %rewritten, "rewrote IdP endpoint for browser access");
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_default_ports() {
        assert_eq!(normalize_url("http://app:80"), "http://app");
        assert_eq!(normalize_url("https://cloud.example.com:443/x"), "https://cloud.example.com");
        assert_eq!(normalize_url("http://keycloak:8080/realms/nc"), "http://keycloak:8080");
    }

    #[test]
    fn external_idp_detected_after_port_normalization() {
        assert_eq!(
            detect_idp_mode("http://keycloak:8080/realms/nc", "http://app:80"),
            IdpMode::External
        );
    }

    #[test]
    fn integrated_mode_when_issuer_sits_on_upstream() {
        assert_eq!(
            detect_idp_mode("https://cloud.example.com", "https://cloud.example.com:443"),
            IdpMode::Integrated
        );
        assert_eq!(
            detect_idp_mode("http://app/apps/oidc", "http://app:80"),
            IdpMode::Integrated
        );
    }

    #[test]
    fn rewrite_replaces_internal_authority_only() {
        let rewritten = rewrite_for_browser(
            "http://app/apps/oidc/authorize?x=1",
            "http://app:80",
            Some("http://localhost:8080"),
        );
        assert_eq!(rewritten, "http://localhost:8080/apps/oidc/authorize?x=1");

        // Endpoint on a different host is untouched.
        let untouched = rewrite_for_browser(
            "http://keycloak:8080/authorize",
            "http://app:80",
            Some("http://localhost:8080"),
        );
        assert_eq!(untouched, "http://keycloak:8080/authorize");
    }

    #[test]
    fn rewrite_is_identity_without_public_issuer() {
        assert_eq!(
            rewrite_for_browser("http://app/authorize", "http://app", None),
            "http://app/authorize"
        );
    }

    #[tokio::test]
    async fn discovery_parses_well_known_document() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": server.uri(),
                "authorization_endpoint": format!("{}/authorize", server.uri()),
                "token_endpoint": format!("{}/token", server.uri()),
                "jwks_uri": format!("{}/jwks", server.uri()),
                "code_challenge_methods_supported": ["S256"],
            })))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let discovery = fetch_discovery(
            &http,
            &format!("{}/.well-known/openid-configuration", server.uri()),
        )
        .await
        .unwrap();
        assert_eq!(discovery.issuer, server.uri());
        assert!(discovery.registration_endpoint.is_none());
        assert_eq!(
            discovery.code_challenge_methods_supported,
            Some(vec!["S256".to_string()])
        );
    }
}
