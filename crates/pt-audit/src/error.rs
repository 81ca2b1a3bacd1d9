// error.rs - Error types for the audit trail.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open or create the audit log file.
    #[error("failed to open audit log at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to append audit event: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The hash chain is broken: a line was inserted, removed or edited.
    #[error("integrity check failed at line {line}: expected hash {expected}, got {actual}")]
    IntegrityViolation {
        line: usize,
        expected: String,
        actual: String,
    },
}
