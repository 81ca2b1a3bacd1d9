// error.rs - Error types for manifest parsing and lookup.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or interpreting a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("failed to read manifest at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file extension does not name a supported manifest format.
    #[error("unsupported manifest format for {path}: expected .yaml, .yml or .json")]
    UnsupportedFormat { path: PathBuf },

    /// A permission string outside the closed permission set.
    #[error("unknown permission '{value}'")]
    UnknownPermission { value: String },

    /// A governing policy tag outside the closed policy set.
    #[error("unknown governing policy '{value}'")]
    UnknownPolicy { value: String },

    /// A data-sharing stance outside the closed set.
    #[error("unknown data sharing stance '{value}'")]
    UnknownSharing { value: String },

    /// Schema-valid document that still failed typed deserialization.
    #[error("manifest does not match the expected shape: {0}")]
    Shape(String),
}
