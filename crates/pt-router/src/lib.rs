//! # pt-router
//!
//! Decides who handles a request: the built-in core or one plugin.
//!
//! Core intents come from a fixed table of anchored patterns and always
//! win when they match. Otherwise every declared intent of every valid
//! plugin is scored against the query and the best match is dispatched
//! into that plugin's sandbox, provided it clears the confidence floor.
//! Anything else falls back to core with low confidence.
//!
//! [`HostConfig`] ties the pieces together: where plugins live, where
//! sandboxes and audit logs go, and the routing and execution tunables.

pub mod config;
pub mod builtin;
pub mod error;
pub mod route;
pub mod router;

pub use config::{HostConfig, LoaderSettings, RouterSettings, SandboxSettings};
pub use builtin::{
    CoreHandler, CoreIntent, CoreTable, DeferredCoreHandler, CORE_CONFIDENCE, CORE_PATTERNS,
};
pub use error::RouterError;
pub use route::{pattern_confidence, RouteMatch, RouteTarget};
pub use router::{IntentRouter, PluginSuggestion, ResponseSource, RouterResponse};
