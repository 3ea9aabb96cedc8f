//! Shared foundation for the Nextcloud MCP bridge.
//!
//! This crate holds the pieces every other crate in the workspace needs:
//! the typed [`Settings`] loaded from the environment, the [`AuthMode`]
//! variant decided once at startup, and the [`BridgeError`] kinds that map
//! onto the HTTP error surface.

pub mod config;
pub mod error;
pub mod mode;

pub use config::Settings;
pub use error::{BridgeError, BridgeResult};
pub use mode::AuthMode;
