//! Ordered startup and shutdown.
//!
//! Startup: observability is already up (the binary holds the guard) →
//! storage → auth configuration → indexing pipeline → HTTP server.
//! Teardown runs in reverse once the serve loop returns: pipeline drain,
//! then the housekeeping sweeper. Configuration failures here are the
//! only non-zero exits; runtime failures stay inside the process.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ncmcp_auth::jwks::JwksClient;
use ncmcp_auth::{
    detect_idp_mode, fetch_discovery, resolve_client_credentials, rewrite_for_browser,
    validate_pkce_support, ProvisioningRateLimiter, TokenExchanger, TokenStorage, TokenVerifier,
    VerifierConfig,
};
use ncmcp_client::NextcloudClient;
use ncmcp_core::{AuthMode, BridgeError, BridgeResult, Settings};
use ncmcp_sync::embedded::{HashingEmbedder, InMemoryVectorStore};
use ncmcp_sync::{Pipeline, PipelineConfig, PipelineContext, ProcessorRegistry};

use crate::registry::ToolRegistry;
use crate::routes::build_router;
use crate::state::{AppState, OAuthState, SharedState};
use crate::tools::build_registry;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Run the bridge until a termination signal.
pub async fn run(settings: Settings) -> BridgeResult<()> {
    let mode = settings.auth_mode();
    info!(mode = %mode, host = settings.host(), "starting bridge");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.http_timeout_seconds))
        .build()
        .map_err(|e| BridgeError::config(format!("HTTP client: {e}")))?;

    let storage = TokenStorage::open(&settings).await?;
    let registry = build_registry(&settings, mode);
    info!(tools = registry.len(), scopes = ?registry.all_scopes(), "tool registry assembled");

    let oauth = if mode.is_oauth() {
        Some(setup_oauth(&settings, &storage, &http, &registry).await?)
    } else {
        None
    };

    let state: SharedState = Arc::new(AppState {
        mode,
        storage,
        oauth,
        registry,
        rate_limiter: ProvisioningRateLimiter::new(),
        http,
        settings,
    });

    let sweeper_token = CancellationToken::new();
    let sweeper = tokio::spawn(housekeeping(state.clone(), sweeper_token.clone()));

    let pipeline = start_pipeline(&state);

    let bind = format!("{}:{}", state.settings.bind_host, state.settings.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| BridgeError::config(format!("cannot bind {bind}: {e}")))?;
    info!(addr = %bind, "HTTP server listening");

    let serve_result = axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Reverse teardown: pipeline first, then housekeeping.
    if let Some(pipeline) = pipeline {
        pipeline.shutdown().await;
    }
    sweeper_token.cancel();
    let _ = sweeper.await;

    match serve_result {
        Ok(()) => {
            info!("bridge stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "HTTP server failed");
            Err(BridgeError::config(format!("HTTP server failed: {e}")))
        }
    }
}

/// Discovery, PKCE validation, IdP-mode detection, credential
/// resolution, and verifier/exchanger construction.
async fn setup_oauth(
    settings: &Settings,
    storage: &TokenStorage,
    http: &reqwest::Client,
    registry: &ToolRegistry,
) -> BridgeResult<OAuthState> {
    let discovery_url = settings.discovery_url();
    let discovery = fetch_discovery(http, &discovery_url).await?;
    validate_pkce_support(&discovery, &discovery_url);

    let idp_mode = detect_idp_mode(&discovery.issuer, settings.host());
    let credentials = resolve_client_credentials(
        settings,
        Some(storage),
        http,
        &discovery,
        &registry.all_scopes(),
    )
    .await?;

    // The public override wins everywhere a browser or client sees the
    // issuer, including JWT issuer validation.
    let issuer = settings
        .public_issuer_url
        .as_deref()
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| discovery.issuer.clone());

    let jwks_uri = settings
        .oidc_jwks_uri
        .clone()
        .or_else(|| discovery.jwks_uri.clone());
    if let Some(uri) = &jwks_uri {
        info!(jwks_uri = %uri, "JWT signature verification enabled");
    }
    if discovery.introspection_endpoint.is_some() {
        info!("opaque-token introspection enabled");
    }

    let jwks = jwks_uri.map(|uri| JwksClient::new(uri, http.clone()));
    let verifier = TokenVerifier::new(
        VerifierConfig {
            issuer: Some(issuer.clone()),
            client_id: credentials.client_id.clone(),
            client_secret: Some(credentials.client_secret.clone()),
            server_url: settings.server_url().to_string(),
            introspection_endpoint: discovery.introspection_endpoint.clone(),
        },
        jwks,
        http.clone(),
    );

    let exchanger = settings.enable_token_exchange.then(|| {
        TokenExchanger::new(
            http.clone(),
            discovery.token_endpoint.clone(),
            credentials.client_id.clone(),
            credentials.client_secret.clone(),
            Some(settings.resource_uri()),
            Duration::from_secs(settings.token_exchange_cache_ttl),
        )
    });

    let browser_authorization_endpoint = rewrite_for_browser(
        &discovery.authorization_endpoint,
        settings.host(),
        settings.public_issuer_url.as_deref(),
    );

    info!(
        issuer = %issuer,
        exchange = exchanger.is_some(),
        "OAuth resource-server configuration complete"
    );
    Ok(OAuthState {
        discovery,
        idp_mode,
        credentials,
        issuer,
        browser_authorization_endpoint,
        verifier,
        exchanger,
    })
}

/// Start the indexing pipeline when enabled and the mode allows it.
fn start_pipeline(state: &SharedState) -> Option<Pipeline> {
    if !state.settings.vector_sync_enabled {
        return None;
    }
    if state.mode != AuthMode::SingleUserBasic {
        warn!(
            mode = %state.mode,
            "vector sync needs fixed credentials (single-user Basic mode); pipeline disabled"
        );
        return None;
    }

    let username = state.settings.nextcloud_username.as_deref()?;
    let password = state.settings.nextcloud_password.as_deref()?;
    let client = match NextcloudClient::with_basic_auth(
        state.settings.host(),
        username,
        password,
        state.upstream_timeout(),
    ) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "could not build the indexing client; pipeline disabled");
            return None;
        }
    };

    let config = PipelineConfig::from_settings(&state.settings, username);
    let ctx = PipelineContext {
        client,
        processors: Arc::new(ProcessorRegistry::with_defaults()),
        embedder: Arc::new(HashingEmbedder),
        store: Arc::new(InMemoryVectorStore::new()),
    };
    Some(ncmcp_sync::start(config, ctx))
}

/// Periodic expired-row sweeps.
async fn housekeeping(state: SharedState, token: CancellationToken) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                match state.storage.cleanup_expired_sessions().await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "swept expired flow sessions"),
                    Err(e) => warn!(error = %e, "session sweep failed"),
                }
                match state.storage.cleanup_expired_tokens().await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "swept expired refresh tokens"),
                    Err(e) => warn!(error = %e, "token sweep failed"),
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
