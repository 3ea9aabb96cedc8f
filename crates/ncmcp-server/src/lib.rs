//! The Nextcloud MCP bridge server.
//!
//! Exposes a collaboration platform to AI clients over the MCP tool
//! protocol, across three authentication postures (fixed-credential
//! Basic, per-request Basic, OAuth resource server), with per-tool scope
//! enforcement, server-mediated offline provisioning, and a background
//! document-indexing pipeline.

pub mod auth_middleware;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod routes;
pub mod state;
pub mod tools;

pub use error::ApiError;
pub use registry::{ToolContext, ToolHandler, ToolRegistry, ToolSpec};
pub use routes::build_router;
pub use state::{AppState, OAuthState, SharedState};
pub use tools::build_registry;
