// error.rs - Error types for plugin workspaces.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A workspace-relative path resolved outside the workspace.
    #[error("path '{path}' resolves outside the workspace of plugin '{plugin_id}'")]
    OutsideWorkspace { plugin_id: String, path: String },

    #[error("file not found in workspace: '{path}'")]
    FileNotFound { path: String },

    /// A write would push the workspace past its storage quota.
    #[error(
        "storage quota of {limit_bytes} bytes exceeded for plugin '{plugin_id}' \
         (would use {attempted_bytes} bytes)"
    )]
    StorageQuotaExceeded {
        plugin_id: String,
        limit_bytes: u64,
        attempted_bytes: u64,
    },

    #[error("malformed settings file {path}: {source}")]
    Settings {
        path: PathBuf,
        source: serde_json::Error,
    },
}
