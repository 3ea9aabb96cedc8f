//! Built-in tools.
//!
//! The bridge ships a small real tool surface: capabilities probe, notes
//! search/read, file read, and (when offline access is on) the
//! provisioning entry point. The per-app tool suites are separate
//! concerns registered through the same [`ToolRegistry`] API.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use tracing::info;

use ncmcp_auth::{FlowKind, NewFlowSession};
use ncmcp_core::{AuthMode, BridgeError, BridgeResult, Settings};

use crate::registry::{ToolContext, ToolHandler, ToolRegistry, ToolSpec};

fn string_arg(arguments: &serde_json::Value, name: &str) -> BridgeResult<String> {
    arguments
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| BridgeError::invalid_argument(format!("missing required argument '{name}'")))
}

fn int_arg(arguments: &serde_json::Value, name: &str) -> BridgeResult<i64> {
    arguments
        .get(name)
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| BridgeError::invalid_argument(format!("missing required argument '{name}'")))
}

struct Capabilities;

#[async_trait]
impl ToolHandler for Capabilities {
    async fn call(
        &self,
        ctx: ToolContext<'_>,
        _arguments: serde_json::Value,
    ) -> BridgeResult<serde_json::Value> {
        let client = ctx.state.upstream_client(ctx.auth)?;
        client.capabilities().await
    }
}

struct NotesSearch;

#[async_trait]
impl ToolHandler for NotesSearch {
    async fn call(
        &self,
        ctx: ToolContext<'_>,
        arguments: serde_json::Value,
    ) -> BridgeResult<serde_json::Value> {
        let query = string_arg(&arguments, "query")?;
        let client = ctx.state.upstream_client(ctx.auth)?;
        let notes = client.search_notes(&query).await?;
        Ok(serde_json::json!({
            "results": notes.iter().map(|n| serde_json::json!({
                "id": n.id,
                "title": n.title,
                "category": n.category,
                "modified": n.modified,
            })).collect::<Vec<_>>(),
        }))
    }
}

struct NotesGet;

#[async_trait]
impl ToolHandler for NotesGet {
    async fn call(
        &self,
        ctx: ToolContext<'_>,
        arguments: serde_json::Value,
    ) -> BridgeResult<serde_json::Value> {
        let note_id = int_arg(&arguments, "note_id")?;
        let client = ctx.state.upstream_client(ctx.auth)?;
        let note = client.get_note(note_id).await?;
        Ok(serde_json::json!({
            "id": note.id,
            "title": note.title,
            "content": note.content,
            "category": note.category,
            "modified": note.modified,
            "favorite": note.favorite,
        }))
    }
}

struct FilesRead;

#[async_trait]
impl ToolHandler for FilesRead {
    async fn call(
        &self,
        ctx: ToolContext<'_>,
        arguments: serde_json::Value,
    ) -> BridgeResult<serde_json::Value> {
        let path = string_arg(&arguments, "path")?;
        let client = ctx.state.upstream_client(ctx.auth)?;
        let (bytes, content_type) = client.read_file(&path).await?;

        // Text comes back verbatim; anything else is base64.
        match String::from_utf8(bytes) {
            Ok(text) => Ok(serde_json::json!({
                "path": path,
                "content_type": content_type,
                "content": text,
            })),
            Err(raw) => Ok(serde_json::json!({
                "path": path,
                "content_type": content_type,
                "content_base64":
                    base64::engine::general_purpose::STANDARD.encode(raw.into_bytes()),
            })),
        }
    }
}

/// Starts the server-mediated provisioning flow: opens a flow session and
/// hands the user a browser URL.
struct ProvisionAccess;

#[async_trait]
impl ToolHandler for ProvisionAccess {
    async fn call(
        &self,
        ctx: ToolContext<'_>,
        _arguments: serde_json::Value,
    ) -> BridgeResult<serde_json::Value> {
        let state = ncmcp_auth::flows::random_token();
        ctx.state
            .storage
            .store_flow_session(
                &NewFlowSession {
                    session_id: state.clone(),
                    state: Some(state.clone()),
                    flow: Some(FlowKind::ServerMediated),
                    is_provisioning: true,
                    ..Default::default()
                },
                None,
            )
            .await?;

        let url = format!(
            "{}/oauth/authorize-nextcloud?state={state}",
            ctx.state.settings.server_url()
        );
        info!(user = ctx.auth.principal(), "provisioning flow initiated");
        Ok(serde_json::json!({
            "authorization_url": url,
            "state": state,
            "instructions":
                "Open the authorization URL in a browser and grant access. \
                 The bridge stores a refresh token for offline operation.",
        }))
    }
}

/// Assemble the compiled-in catalog for this deployment.
pub fn build_registry(settings: &Settings, mode: AuthMode) -> ToolRegistry {
    let mut registry = ToolRegistry::default();

    registry.register(ToolSpec::new(
        "nc_get_capabilities",
        "Get the Nextcloud host capabilities",
        &[],
        serde_json::json!({"type": "object", "properties": {}}),
        Arc::new(Capabilities),
    ));
    registry.register(ToolSpec::new(
        "notes_search_notes",
        "Search the user's notes by title and content",
        &["notes:read"],
        serde_json::json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"],
        }),
        Arc::new(NotesSearch),
    ));
    registry.register(ToolSpec::new(
        "notes_get_note",
        "Fetch a single note by id",
        &["notes:read"],
        serde_json::json!({
            "type": "object",
            "properties": {"note_id": {"type": "integer"}},
            "required": ["note_id"],
        }),
        Arc::new(NotesGet),
    ));
    registry.register(ToolSpec::new(
        "files_read_file",
        "Read a file from the user's storage via WebDAV",
        &["files:read"],
        serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
        }),
        Arc::new(FilesRead),
    ));

    // The provisioning tool only makes sense as an OAuth resource server
    // with offline access, and is redundant once token exchange covers
    // upstream calls.
    if mode.is_oauth() && settings.enable_offline_access && !settings.enable_token_exchange {
        registry.register(ToolSpec::new(
            "provision_nextcloud_access",
            "Grant the bridge offline access to Nextcloud on your behalf",
            &[],
            serde_json::json!({"type": "object", "properties": {}}),
            Arc::new(ProvisionAccess),
        ));
    }

    registry
}
