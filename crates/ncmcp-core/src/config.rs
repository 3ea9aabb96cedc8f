//! Environment-driven settings.
//!
//! All recognized options are collected into one [`Settings`] struct,
//! deserialized from the process environment through the `config` crate.
//! Defaults live on the struct; validation that cannot be expressed as a
//! default (required host, mode consistency) happens in [`Settings::validate`].

use serde::Deserialize;

use crate::error::{BridgeError, BridgeResult};
use crate::mode::AuthMode;

fn default_mcp_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_token_storage_db() -> String {
    "ncmcp_tokens.db".to_string()
}

fn default_oidc_token_type() -> String {
    "Bearer".to_string()
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_queue_max_size() -> usize {
    100
}

fn default_processor_workers() -> usize {
    2
}

fn default_scan_interval() -> u64 {
    300
}

fn default_sync_tag() -> String {
    "mcp-index".to_string()
}

fn default_http_timeout() -> u64 {
    10
}

fn default_exchange_cache_ttl() -> u64 {
    3600
}

fn default_service_name() -> String {
    "ncmcp-server".to_string()
}

fn default_sampler_arg() -> f64 {
    1.0
}

/// Every option the bridge recognizes, in one place.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Upstream Nextcloud base URL.
    pub nextcloud_host: Option<String>,
    /// Fixed upstream username. With `nextcloud_password`, selects
    /// single-user Basic mode.
    pub nextcloud_username: Option<String>,
    /// Fixed upstream password.
    pub nextcloud_password: Option<String>,
    /// Deployment flag enabling per-request Basic credential extraction.
    #[serde(default)]
    pub enable_multi_user_basic: bool,

    /// OIDC discovery override; defaults to the upstream's well-known path.
    pub oidc_discovery_url: Option<String>,
    /// Static OAuth client id (skips dynamic registration).
    pub oidc_client_id: Option<String>,
    /// Static OAuth client secret.
    pub oidc_client_secret: Option<String>,
    /// Requested token type on registration: `Bearer` or `jwt`.
    #[serde(default = "default_oidc_token_type")]
    pub oidc_token_type: String,
    /// JWKS URI override (internal-host rewrites).
    pub oidc_jwks_uri: Option<String>,
    /// Browser-reachable issuer URL override.
    pub public_issuer_url: Option<String>,

    /// The bridge's own public URL; `/mcp` is appended for the resource.
    #[serde(default = "default_mcp_server_url")]
    pub mcp_server_url: String,
    /// Upstream audience used for token exchange.
    pub nextcloud_resource_uri: Option<String>,

    /// Base-64 AES-256-GCM key for encrypted columns.
    pub token_encryption_key: Option<String>,
    /// SQLite file path.
    #[serde(default = "default_token_storage_db")]
    pub token_storage_db: String,

    /// Persist refresh tokens for background use.
    #[serde(default)]
    pub enable_offline_access: bool,
    /// Exchange inbound tokens for upstream-audienced ones (RFC 8693).
    #[serde(default)]
    pub enable_token_exchange: bool,
    /// Upper bound on exchanged-token cache lifetime, seconds.
    #[serde(default = "default_exchange_cache_ttl")]
    pub token_exchange_cache_ttl: u64,

    /// Enable the background indexing pipeline.
    #[serde(default)]
    pub vector_sync_enabled: bool,
    /// Bounded document-queue capacity.
    #[serde(default = "default_queue_max_size")]
    pub vector_sync_queue_max_size: usize,
    /// Processor worker-pool size.
    #[serde(default = "default_processor_workers")]
    pub vector_sync_processor_workers: usize,
    /// Upstream tag marking documents for indexing.
    #[serde(default = "default_sync_tag")]
    pub vector_sync_tag: String,
    /// Seconds between periodic scans.
    #[serde(default = "default_scan_interval")]
    pub vector_sync_interval_seconds: u64,
    /// External vector store URL; unset means embedded.
    pub vector_store_url: Option<String>,

    /// AI-client allow-list for the direct authorization flow.
    #[serde(default)]
    pub allowed_mcp_clients: Vec<String>,
    /// Admit unlisted AI clients with localhost redirects (DCR posture).
    #[serde(default)]
    pub enable_dcr: bool,

    /// Serve Prometheus metrics on the dedicated port.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Dedicated metrics listener port.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// OTLP gRPC endpoint; unset disables trace export.
    pub otel_exporter_otlp_endpoint: Option<String>,
    /// Service name on exported spans.
    #[serde(default = "default_service_name")]
    pub otel_service_name: String,
    /// Trace sampling ratio.
    #[serde(default = "default_sampler_arg")]
    pub otel_traces_sampler_arg: f64,

    /// Bind address for the HTTP server.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Bind port for the HTTP server.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-call HTTP timeout, seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> BridgeResult<Self> {
        let loader = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_mcp_clients"),
            )
            .build()
            .map_err(|e| BridgeError::config(format!("failed to read environment: {e}")))?;

        let settings: Settings = loader
            .try_deserialize()
            .map_err(|e| BridgeError::config(format!("invalid configuration: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the process cannot start with.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.nextcloud_host.as_deref().unwrap_or("").is_empty() {
            return Err(BridgeError::config(
                "nextcloud_host is required (upstream base URL)",
            ));
        }
        if self.nextcloud_username.is_some() != self.nextcloud_password.is_some() {
            return Err(BridgeError::config(
                "nextcloud_username and nextcloud_password must be set together",
            ));
        }
        Ok(())
    }

    /// Upstream base URL without a trailing slash.
    ///
    /// Only call after [`Settings::validate`] has passed.
    pub fn host(&self) -> &str {
        self.nextcloud_host
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/')
    }

    /// The operating mode, decided once from configuration.
    pub fn auth_mode(&self) -> AuthMode {
        if self.nextcloud_username.is_some() && self.nextcloud_password.is_some() {
            AuthMode::SingleUserBasic
        } else if self.enable_multi_user_basic {
            AuthMode::MultiUserBasic
        } else {
            AuthMode::OAuthResourceServer
        }
    }

    /// Discovery URL, defaulting to the upstream's well-known document.
    pub fn discovery_url(&self) -> String {
        self.oidc_discovery_url.clone().unwrap_or_else(|| {
            format!("{}/.well-known/openid-configuration", self.host())
        })
    }

    /// The bridge's public URL without a trailing slash.
    pub fn server_url(&self) -> &str {
        self.mcp_server_url.trim_end_matches('/')
    }

    /// The RFC 8707 resource identifier for the tool endpoint.
    pub fn mcp_resource(&self) -> String {
        format!("{}/mcp", self.server_url())
    }

    /// Upstream audience for token exchange, defaulting to the host.
    pub fn resource_uri(&self) -> String {
        self.nextcloud_resource_uri
            .clone()
            .unwrap_or_else(|| self.host().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Settings {
        serde_json::from_value(serde_json::json!({
            "nextcloud_host": "https://cloud.example.com/"
        }))
        .expect("minimal settings deserialize")
    }

    #[test]
    fn mode_single_user_when_both_credentials_set() {
        let mut s = minimal();
        s.nextcloud_username = Some("admin".into());
        s.nextcloud_password = Some("secret".into());
        assert_eq!(s.auth_mode(), AuthMode::SingleUserBasic);
    }

    #[test]
    fn mode_multi_user_when_flag_set() {
        let mut s = minimal();
        s.enable_multi_user_basic = true;
        assert_eq!(s.auth_mode(), AuthMode::MultiUserBasic);
    }

    #[test]
    fn mode_oauth_otherwise() {
        assert_eq!(minimal().auth_mode(), AuthMode::OAuthResourceServer);
    }

    #[test]
    fn host_strips_trailing_slash() {
        assert_eq!(minimal().host(), "https://cloud.example.com");
    }

    #[test]
    fn discovery_url_defaults_to_upstream_well_known() {
        assert_eq!(
            minimal().discovery_url(),
            "https://cloud.example.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn mcp_resource_appends_path() {
        assert_eq!(minimal().mcp_resource(), "http://localhost:8000/mcp");
    }

    #[test]
    fn validate_rejects_lone_username() {
        let mut s = minimal();
        s.nextcloud_username = Some("admin".into());
        assert!(s.validate().is_err());
    }
}
