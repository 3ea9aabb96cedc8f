//! Liveness and readiness probes.

use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use ncmcp_core::AuthMode;
use ncmcp_telemetry::{record_dependency_check, set_dependency_health};

use crate::state::SharedState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// GET `/health/live`: the process is running.
pub async fn live(State(state): State<SharedState>) -> Response {
    Json(json!({
        "status": "alive",
        "mode": state.mode.to_string(),
    }))
    .into_response()
}

/// GET `/health/ready`: configuration plus dependency reachability,
/// with a per-dependency report.
pub async fn ready(State(state): State<SharedState>) -> Response {
    let mut checks = Map::new();
    let mut is_ready = true;

    // Upstream configuration and reachability.
    checks.insert("nextcloud_configured".into(), Value::from("ok"));
    let start = Instant::now();
    let status_url = format!("{}/status.php", state.settings.host());
    let probe = state
        .http
        .get(&status_url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await;
    let elapsed = start.elapsed();
    record_dependency_check("nextcloud", elapsed);
    match probe {
        Ok(response) if response.status().is_success() => {
            checks.insert("nextcloud_reachable".into(), Value::from("ok"));
            set_dependency_health("nextcloud", true);
        }
        Ok(response) => {
            checks.insert(
                "nextcloud_reachable".into(),
                Value::from(format!("error: status {}", response.status().as_u16())),
            );
            set_dependency_health("nextcloud", false);
            is_ready = false;
        }
        Err(e) => {
            checks.insert(
                "nextcloud_reachable".into(),
                Value::from(format!("error: {e}")),
            );
            set_dependency_health("nextcloud", false);
            is_ready = false;
        }
    }

    // Authentication posture.
    checks.insert("auth_mode".into(), Value::from(state.mode.to_string()));
    let auth_ok = match state.mode {
        AuthMode::SingleUserBasic => {
            state.settings.nextcloud_username.is_some()
                && state.settings.nextcloud_password.is_some()
        }
        AuthMode::MultiUserBasic => state.storage.has_cipher(),
        AuthMode::OAuthResourceServer => state.oauth.is_some(),
    };
    checks.insert(
        "auth_configured".into(),
        Value::from(if auth_ok { "ok" } else { "error: not configured" }),
    );
    is_ready &= auth_ok;

    // Vector store, only when the pipeline is on. External stores are
    // probed; the embedded store has nothing network-visible to check.
    if state.settings.vector_sync_enabled {
        match state.settings.vector_store_url.as_deref() {
            Some(store_url) => {
                let start = Instant::now();
                let probe = state
                    .http
                    .get(format!("{}/readyz", store_url.trim_end_matches('/')))
                    .timeout(PROBE_TIMEOUT)
                    .send()
                    .await;
                record_dependency_check("vector_store", start.elapsed());
                match probe {
                    Ok(response) if response.status().is_success() => {
                        checks.insert("vector_store".into(), Value::from("ok"));
                        set_dependency_health("vector_store", true);
                    }
                    Ok(response) => {
                        checks.insert(
                            "vector_store".into(),
                            Value::from(format!("error: status {}", response.status().as_u16())),
                        );
                        set_dependency_health("vector_store", false);
                        is_ready = false;
                    }
                    Err(e) => {
                        checks.insert("vector_store".into(), Value::from(format!("error: {e}")));
                        set_dependency_health("vector_store", false);
                        is_ready = false;
                    }
                }
            }
            None => {
                checks.insert("vector_store".into(), Value::from("embedded"));
                set_dependency_health("vector_store", true);
            }
        }
    }

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if is_ready { "ready" } else { "not_ready" },
            "checks": Value::Object(checks),
        })),
    )
        .into_response()
}
