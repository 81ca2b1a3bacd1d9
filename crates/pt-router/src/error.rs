// error.rs - Router errors.
//
// Sandbox violations and runtime failures pass through unchanged inside
// `Sandbox` so callers keep the plugin id, action and reason.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Sandbox(#[from] pt_sandbox::SandboxError),

    /// The route named a plugin that is not valid in the current index.
    #[error("plugin '{plugin_id}' is not in the plugin index")]
    UnknownPlugin { plugin_id: String },

    /// A consent decision arrived for a plugin that has no sandbox yet.
    #[error("no sandbox is running for plugin '{plugin_id}'")]
    NoSandbox { plugin_id: String },

    #[error("core handler failed: {message}")]
    Core { message: String },

    #[error("invalid core pattern '{pattern}': {source}")]
    InvalidCorePattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid host configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },
}
