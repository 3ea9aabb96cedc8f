//! Declarative tool catalog with per-tool scope tags.
//!
//! Tools are annotated with required scopes at registration. The list
//! endpoint projects the catalog per request (a tool appears iff its
//! scope set is a subset of the caller's), the call path raises the
//! structured insufficient-scope error, and the Protected Resource
//! Metadata derives `scopes_supported` from the union of all tags.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use ncmcp_auth::RequestAuthContext;
use ncmcp_core::{BridgeError, BridgeResult};

use crate::state::AppState;

/// Everything a tool handler gets to work with.
pub struct ToolContext<'a> {
    pub state: &'a AppState,
    pub auth: &'a RequestAuthContext,
}

/// One tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        ctx: ToolContext<'_>,
        arguments: serde_json::Value,
    ) -> BridgeResult<serde_json::Value>;
}

/// A registered tool: metadata plus handler.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required_scopes: &'static [&'static str],
    pub input_schema: serde_json::Value,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("required_scopes", &self.required_scopes)
            .finish_non_exhaustive()
    }
}

impl ToolSpec {
    pub fn new(
        name: &'static str,
        description: &'static str,
        required_scopes: &'static [&'static str],
        input_schema: serde_json::Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name,
            description,
            required_scopes,
            input_schema,
            handler,
        }
    }

    /// Whether the caller's scopes cover this tool.
    ///
    /// `None` means a Basic mode: no filtering applies. An empty scope
    /// set (absent `scope` claim) disables every scope-gated tool.
    pub fn visible_to(&self, caller_scopes: Option<&[String]>) -> bool {
        match caller_scopes {
            None => true,
            Some(scopes) => self
                .required_scopes
                .iter()
                .all(|required| scopes.iter().any(|s| s == required)),
        }
    }

    /// The scopes the caller is missing for this tool.
    pub fn missing_scopes(&self, caller_scopes: Option<&[String]>) -> Vec<String> {
        match caller_scopes {
            None => Vec::new(),
            Some(scopes) => self
                .required_scopes
                .iter()
                .filter(|required| !scopes.iter().any(|s| s == **required))
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Run the tool.
    pub async fn call(
        &self,
        ctx: ToolContext<'_>,
        arguments: serde_json::Value,
    ) -> BridgeResult<serde_json::Value> {
        self.handler.call(ctx, arguments).await
    }
}

/// The compiled-in catalog, projected per request.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.push(spec);
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Tools visible to a caller with the given scopes.
    pub fn list_for(&self, caller_scopes: Option<&[String]>) -> Vec<&ToolSpec> {
        self.tools
            .iter()
            .filter(|t| t.visible_to(caller_scopes))
            .collect()
    }

    /// Authorize a call, raising the structured scope error.
    pub fn authorize_call(
        &self,
        spec: &ToolSpec,
        caller_scopes: Option<&[String]>,
    ) -> BridgeResult<()> {
        let missing = spec.missing_scopes(caller_scopes);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::InsufficientScope { missing })
        }
    }

    /// Union of every registered tool's required scopes, sorted. This is
    /// the advertised scope universe; it is derived, never configured.
    pub fn all_scopes(&self) -> Vec<String> {
        self.tools
            .iter()
            .flat_map(|t| t.required_scopes.iter().map(|s| (*s).to_string()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl ToolHandler for Noop {
        async fn call(
            &self,
            _ctx: ToolContext<'_>,
            _arguments: serde_json::Value,
        ) -> BridgeResult<serde_json::Value> {
            Ok(serde_json::json!(null))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        registry.register(ToolSpec::new(
            "notes_search_notes",
            "Search notes",
            &["notes:read"],
            serde_json::json!({"type": "object"}),
            Arc::new(Noop),
        ));
        registry.register(ToolSpec::new(
            "notes_delete_note",
            "Delete a note",
            &["notes:read", "notes:write"],
            serde_json::json!({"type": "object"}),
            Arc::new(Noop),
        ));
        registry.register(ToolSpec::new(
            "nc_get_capabilities",
            "Capabilities",
            &[],
            serde_json::json!({"type": "object"}),
            Arc::new(Noop),
        ));
        registry
    }

    fn scopes(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn listing_is_the_subset_law() {
        let registry = registry();

        // Basic mode: no filtering.
        assert_eq!(registry.list_for(None).len(), 3);

        // Reader sees the read tool and the untagged tool.
        let visible = registry.list_for(Some(&scopes(&["notes:read"])));
        let names: Vec<_> = visible.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["notes_search_notes", "nc_get_capabilities"]);

        // Empty scope set (absent claim) hides every gated tool.
        let visible = registry.list_for(Some(&scopes(&[])));
        let names: Vec<_> = visible.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["nc_get_capabilities"]);
    }

    #[test]
    fn call_authorization_reports_exactly_the_missing_scopes() {
        let registry = registry();
        let spec = registry.get("notes_delete_note").unwrap();

        let err = registry
            .authorize_call(spec, Some(&scopes(&["notes:read"])))
            .unwrap_err();
        match err {
            BridgeError::InsufficientScope { missing } => {
                assert_eq!(missing, vec!["notes:write"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(registry
            .authorize_call(spec, Some(&scopes(&["notes:read", "notes:write"])))
            .is_ok());
        assert!(registry.authorize_call(spec, None).is_ok());
    }

    #[test]
    fn advertised_scopes_are_the_union_of_tags() {
        assert_eq!(
            registry().all_scopes(),
            vec!["notes:read".to_string(), "notes:write".to_string()]
        );
    }
}
