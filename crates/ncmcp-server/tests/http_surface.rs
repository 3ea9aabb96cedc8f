//! Router-level tests over the assembled HTTP surface.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ncmcp_auth::{
    ProvisioningRateLimiter, TokenStorage, TokenVerifier, VerifierConfig,
};
use ncmcp_core::Settings;
use ncmcp_server::{build_registry, build_router, AppState, OAuthState, SharedState};

const BRIDGE_URL: &str = "http://localhost:8000";

fn settings(extra: serde_json::Value) -> Settings {
    let mut base = serde_json::json!({
        "nextcloud_host": "https://cloud.example.com",
        "mcp_server_url": BRIDGE_URL,
        "allowed_mcp_clients": ["mcp-client-abc"],
    });
    base.as_object_mut()
        .unwrap()
        .extend(extra.as_object().cloned().unwrap_or_default());
    serde_json::from_value(base).unwrap()
}

async fn storage(dir: &tempfile::TempDir) -> TokenStorage {
    TokenStorage::open_at(
        &dir.path().join("tokens.db"),
        Some(&ncmcp_auth::FieldCipher::generate_key_base64()),
    )
    .await
    .unwrap()
}

async fn basic_state(dir: &tempfile::TempDir) -> SharedState {
    let settings = settings(serde_json::json!({
        "nextcloud_username": "admin",
        "nextcloud_password": "secret",
    }));
    let mode = settings.auth_mode();
    let registry = build_registry(&settings, mode);
    Arc::new(AppState {
        mode,
        storage: storage(dir).await,
        oauth: None,
        registry,
        rate_limiter: ProvisioningRateLimiter::new(),
        http: reqwest::Client::new(),
        settings,
    })
}

async fn oauth_state(dir: &tempfile::TempDir, introspection_url: &str) -> SharedState {
    let settings = settings(serde_json::json!({}));
    let mode = settings.auth_mode();
    assert!(mode.is_oauth());
    let registry = build_registry(&settings, mode);

    let discovery: ncmcp_auth::OidcDiscovery = serde_json::from_value(serde_json::json!({
        "issuer": "https://idp.example.com",
        "authorization_endpoint": "https://idp.example.com/authorize",
        "token_endpoint": "https://idp.example.com/token",
        "introspection_endpoint": introspection_url,
        "code_challenge_methods_supported": ["S256"],
    }))
    .unwrap();

    let http = reqwest::Client::new();
    let verifier = TokenVerifier::new(
        VerifierConfig {
            issuer: Some("https://idp.example.com".into()),
            client_id: "bridge-client".into(),
            client_secret: Some("bridge-secret".into()),
            server_url: BRIDGE_URL.into(),
            introspection_endpoint: Some(introspection_url.to_string()),
        },
        None,
        http.clone(),
    );

    let oauth = OAuthState {
        browser_authorization_endpoint: discovery.authorization_endpoint.clone(),
        discovery,
        idp_mode: ncmcp_auth::IdpMode::External,
        credentials: ncmcp_auth::ClientCredentials {
            client_id: "bridge-client".into(),
            client_secret: "bridge-secret".into(),
        },
        issuer: "https://idp.example.com".into(),
        verifier,
        exchanger: None,
    };

    Arc::new(AppState {
        mode,
        storage: storage(dir).await,
        oauth: Some(oauth),
        registry,
        rate_limiter: ProvisioningRateLimiter::new(),
        http,
        settings,
    })
}

async fn idp_with_token(scope: &str) -> MockServer {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "active": true,
            "sub": "alice",
            "aud": "bridge-client",
            "scope": scope,
            "client_id": "mcp-client-abc",
            "exp": chrono::Utc::now().timestamp() + 600,
        })))
        .mount(&idp)
        .await;
    idp
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn rpc(method: &str, params: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            })
            .to_string(),
        ))
        .unwrap()
}

fn with_bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

#[tokio::test]
async fn liveness_always_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(basic_state(&dir).await);

    let response = app
        .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "alive");
    assert_eq!(body["mode"], "single-user-basic");
}

#[tokio::test]
async fn prm_document_derives_scopes_from_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    let idp = idp_with_token("openid").await;
    let state = oauth_state(&dir, &format!("{}/introspect", idp.uri())).await;
    let expected_scopes = state.registry.all_scopes();
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::get("/.well-known/oauth-protected-resource/mcp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["resource"], format!("{BRIDGE_URL}/mcp"));
    let advertised: Vec<String> =
        serde_json::from_value(body["scopes_supported"].clone()).unwrap();
    assert_eq!(advertised, expected_scopes);
    assert_eq!(body["authorization_servers"][0], "https://idp.example.com");
}

#[tokio::test]
async fn direct_authorize_validates_and_redirects_to_the_idp() {
    let dir = tempfile::tempdir().unwrap();
    let idp = idp_with_token("openid").await;
    let app = build_router(oauth_state(&dir, &format!("{}/introspect", idp.uri())).await);

    // Wrong response type.
    let response = app
        .clone()
        .oneshot(
            Request::get("/oauth/authorize?response_type=token&client_id=mcp-client-abc&redirect_uri=http://localhost:1234/cb&state=s&code_challenge=c&code_challenge_method=S256")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "unsupported_response_type");

    // Unknown client.
    let response = app
        .clone()
        .oneshot(
            Request::get("/oauth/authorize?response_type=code&client_id=rogue&redirect_uri=http://localhost:1234/cb&state=s&code_challenge=c&code_challenge_method=S256")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Happy path: a 302 straight to the IdP carrying the client's state.
    let response = app
        .oneshot(
            Request::get("/oauth/authorize?response_type=code&client_id=mcp-client-abc&redirect_uri=http://localhost:1234/cb&state=xyzzy&code_challenge=c&code_challenge_method=S256")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.starts_with("https://idp.example.com/authorize?"));
    assert!(location.contains("client_id=mcp-client-abc"));
    assert!(location.contains("state=xyzzy"));
    assert!(location.contains("prompt=consent"));
}

#[tokio::test]
async fn basic_mode_lists_every_tool_without_filtering() {
    let dir = tempfile::tempdir().unwrap();
    let state = basic_state(&dir).await;
    let total = state.registry.len();
    let app = build_router(state);

    let response = app
        .oneshot(rpc("tools/list", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), total);
}

#[tokio::test]
async fn oauth_mode_requires_a_bearer_token() {
    let dir = tempfile::tempdir().unwrap();
    let idp = idp_with_token("openid").await;
    let app = build_router(oauth_state(&dir, &format!("{}/introspect", idp.uri())).await);

    let response = app
        .oneshot(rpc("tools/list", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(challenge.contains(".well-known/oauth-protected-resource/mcp"));
}

#[tokio::test]
async fn token_scopes_project_the_tool_list() {
    let dir = tempfile::tempdir().unwrap();
    let idp = idp_with_token("openid notes:read").await;
    let app = build_router(oauth_state(&dir, &format!("{}/introspect", idp.uri())).await);

    let response = app
        .oneshot(with_bearer(rpc("tools/list", serde_json::json!({})), "opaque-token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"notes_search_notes"));
    assert!(names.contains(&"notes_get_note"));
    assert!(names.contains(&"nc_get_capabilities"));
    // files:read is not granted, so the file tool is hidden.
    assert!(!names.contains(&"files_read_file"));
}

#[tokio::test]
async fn insufficient_scope_call_gets_the_403_challenge() {
    let dir = tempfile::tempdir().unwrap();
    let idp = idp_with_token("openid").await;
    let app = build_router(oauth_state(&dir, &format!("{}/introspect", idp.uri())).await);

    let response = app
        .oneshot(with_bearer(
            rpc(
                "tools/call",
                serde_json::json!({"name": "notes_search_notes", "arguments": {"query": "x"}}),
            ),
            "opaque-token",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let challenge = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(challenge.contains("insufficient_scope"));
    assert!(challenge.contains("scope=\"notes:read\""));
    let body = body_json(response).await;
    assert_eq!(body["scopes_required"][0], "notes:read");
}

#[tokio::test]
async fn unknown_tool_is_a_jsonrpc_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(basic_state(&dir).await);

    let response = app
        .oneshot(rpc(
            "tools/call",
            serde_json::json!({"name": "no_such_tool", "arguments": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn malformed_webhook_payload_is_a_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(basic_state(&dir).await);

    let response = app
        .oneshot(
            Request::post("/webhooks/nextcloud")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_payload");
}

#[tokio::test]
async fn app_password_rate_limit_returns_retry_after() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(basic_state(&dir).await);

    // Exhaust the window without valid upstream credentials; every
    // rejected attempt still counts.
    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/v1/users/alice/app-password")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app
        .oneshot(
            Request::post("/api/v1/users/alice/app-password")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 3600);
}

#[tokio::test]
async fn admin_routes_redirect_unauthenticated_browsers_to_login() {
    let dir = tempfile::tempdir().unwrap();
    let idp = idp_with_token("openid").await;
    let app = build_router(oauth_state(&dir, &format!("{}/introspect", idp.uri())).await);

    let response = app
        .oneshot(Request::get("/app/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/oauth/login"
    );
}

#[tokio::test]
async fn expired_provisioning_callback_is_invalid_request() {
    let dir = tempfile::tempdir().unwrap();
    let idp = idp_with_token("openid").await;
    let app = build_router(oauth_state(&dir, &format!("{}/introspect", idp.uri())).await);

    let response = app
        .oneshot(
            Request::get("/oauth/callback?code=abc&state=unknown-session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}
