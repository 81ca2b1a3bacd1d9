//! # pt-workspace
//!
//! Every sandboxed plugin gets its own directory under the sandbox root,
//! with `data/`, `cache/` and `logs/` inside. [`PluginWorkspace`] decides
//! whether a path is inside that directory and enforces the plugin's
//! storage quota on writes.

pub mod error;
pub mod workspace;

pub use error::WorkspaceError;
pub use workspace::{PathScope, PluginWorkspace};
