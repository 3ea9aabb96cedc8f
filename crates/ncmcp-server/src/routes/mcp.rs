//! The tool-protocol endpoint.
//!
//! A minimal JSON-RPC surface: `initialize`, `ping`, `tools/list`,
//! `tools/call`. Listing projects the catalog by the caller's verified
//! scopes; calls are scope-checked and the structured scope failure maps
//! to the 403 challenge. Tool execution failures stay inside the tool
//! result envelope, protocol failures are JSON-RPC errors.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::{info, info_span, Instrument};

use ncmcp_core::BridgeError;
use ncmcp_telemetry::record_tool_call;

use crate::auth_middleware::AuthExtension;
use crate::error::ApiError;
use crate::registry::ToolContext;
use crate::state::SharedState;

const PROTOCOL_VERSION: &str = "2025-03-26";

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

fn rpc_result(id: Option<serde_json::Value>, result: serde_json::Value) -> Response {
    Json(serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    }))
    .into_response()
}

fn rpc_error(id: Option<serde_json::Value>, code: i64, message: &str) -> Response {
    Json(serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    }))
    .into_response()
}

fn unauthorized(state: &SharedState) -> Response {
    ApiError::new(
        BridgeError::auth("missing or invalid credentials"),
        state.settings.server_url(),
    )
    .into_response()
}

/// POST `/mcp`.
pub async fn handle(
    State(state): State<SharedState>,
    Extension(AuthExtension(auth)): Extension<AuthExtension>,
    Json(request): Json<JsonRpcRequest>,
) -> Response {
    match request.method.as_str() {
        "initialize" => {
            log_client_info(&request.params);
            rpc_result(
                request.id,
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {
                        "name": "ncmcp-server",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {"tools": {"listChanged": false}},
                }),
            )
        }
        "ping" => rpc_result(request.id, serde_json::json!({})),
        "tools/list" => {
            // OAuth mode requires a verified token even to list.
            if state.mode.is_oauth() && auth.is_none() {
                return unauthorized(&state);
            }
            let scopes = auth.as_ref().and_then(|c| c.scopes());
            let tools: Vec<serde_json::Value> = state
                .registry
                .list_for(scopes)
                .into_iter()
                .map(|spec| {
                    serde_json::json!({
                        "name": spec.name,
                        "description": spec.description,
                        "inputSchema": spec.input_schema,
                    })
                })
                .collect();
            info!(
                visible = tools.len(),
                total = state.registry.len(),
                filtered = scopes.is_some(),
                "tools/list"
            );
            rpc_result(request.id, serde_json::json!({"tools": tools}))
        }
        "tools/call" => {
            let Some(auth) = auth else {
                return unauthorized(&state);
            };
            let name = request
                .params
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));

            let Some(spec) = state.registry.get(&name) else {
                return rpc_error(request.id, -32602, &format!("unknown tool: {name}"));
            };

            if let Err(e) = state.registry.authorize_call(spec, auth.scopes()) {
                record_tool_call(&name, "insufficient_scope", std::time::Duration::ZERO);
                return ApiError::new(e, state.settings.server_url()).into_response();
            }

            let started = Instant::now();
            let span = info_span!("tool_call", tool = %name, user = %auth.principal());
            let result = spec
                .call(
                    ToolContext {
                        state: &state,
                        auth: &auth,
                    },
                    arguments,
                )
                .instrument(span)
                .await;

            match result {
                Ok(value) => {
                    record_tool_call(&name, "ok", started.elapsed());
                    rpc_result(
                        request.id,
                        serde_json::json!({
                            "content": [{
                                "type": "text",
                                "text": serde_json::to_string_pretty(&value)
                                    .unwrap_or_else(|_| value.to_string()),
                            }],
                            "isError": false,
                        }),
                    )
                }
                Err(BridgeError::Auth(detail)) => {
                    record_tool_call(&name, "auth_failure", started.elapsed());
                    ApiError::new(BridgeError::Auth(detail), state.settings.server_url())
                        .into_response()
                }
                Err(BridgeError::InvalidArgument(message)) => {
                    record_tool_call(&name, "invalid_arguments", started.elapsed());
                    rpc_error(request.id, -32602, &message)
                }
                Err(e) => {
                    record_tool_call(&name, "error", started.elapsed());
                    // Tool failures stay inside the protocol envelope.
                    rpc_result(
                        request.id,
                        serde_json::json!({
                            "content": [{"type": "text", "text": e.to_string()}],
                            "isError": true,
                        }),
                    )
                }
            }
        }
        _ if request.id.is_none() => {
            // Notifications are acknowledged and dropped.
            StatusCode::ACCEPTED.into_response()
        }
        other => rpc_error(request.id, -32601, &format!("method not found: {other}")),
    }
}

fn log_client_info(params: &serde_json::Value) {
    let client = params.get("clientInfo");
    let name = client
        .and_then(|c| c.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let version = client
        .and_then(|c| c.get("version"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let capabilities: Vec<String> = params
        .get("capabilities")
        .and_then(|c| c.as_object())
        .map(|caps| caps.keys().cloned().collect())
        .unwrap_or_default();
    info!(client = name, version, capabilities = ?capabilities, "MCP client connected");
}
