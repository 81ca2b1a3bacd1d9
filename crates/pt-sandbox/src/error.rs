// error.rs - Sandbox error taxonomy.
//
// `Violation` means the declared contract said no. `Runtime` means the
// handler itself went wrong: a timeout, a resource limit, a returned error
// or a panic. Consent is not an error; see `ExecutionOutcome`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a handler run ended badly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeFailure {
    Timeout { limit_ms: u64 },
    MemoryLimit { limit_mb: u64, requested_bytes: u64 },
    StorageLimit { limit_mb: u64, attempted_bytes: u64 },
    HandlerFailed { message: String },
    Panicked { message: String },
}

impl fmt::Display for RuntimeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeFailure::Timeout { limit_ms } => {
                write!(f, "timed out after {limit_ms} ms")
            }
            RuntimeFailure::MemoryLimit {
                limit_mb,
                requested_bytes,
            } => write!(
                f,
                "memory limit of {limit_mb} MB exceeded ({requested_bytes} bytes requested)"
            ),
            RuntimeFailure::StorageLimit {
                limit_mb,
                attempted_bytes,
            } => write!(
                f,
                "storage limit of {limit_mb} MB exceeded ({attempted_bytes} bytes)"
            ),
            RuntimeFailure::HandlerFailed { message } => write!(f, "handler failed: {message}"),
            RuntimeFailure::Panicked { message } => write!(f, "handler panicked: {message}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The manifest's boundaries stopped the execution.
    #[error("sandbox violation in plugin '{plugin_id}' ({action}): {reason}")]
    Violation {
        plugin_id: String,
        action: String,
        reason: String,
    },

    #[error("plugin '{plugin_id}' failed on intent '{intent}': {failure}")]
    Runtime {
        plugin_id: String,
        intent: String,
        failure: RuntimeFailure,
    },

    /// A declared intent points at a handler the implementation lacks.
    #[error("plugin '{plugin_id}' has no handler '{handler}' for declared intent '{intent}'")]
    MissingHandler {
        plugin_id: String,
        handler: String,
        intent: String,
    },

    #[error("no implementation registered for plugin '{plugin_id}'")]
    NotRegistered { plugin_id: String },

    #[error(transparent)]
    Workspace(#[from] pt_workspace::WorkspaceError),

    #[error(transparent)]
    Policy(#[from] pt_policy::PolicyError),

    #[error(transparent)]
    Audit(#[from] pt_audit::AuditError),
}

impl SandboxError {
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            SandboxError::Violation { plugin_id, .. }
            | SandboxError::Runtime { plugin_id, .. }
            | SandboxError::MissingHandler { plugin_id, .. }
            | SandboxError::NotRegistered { plugin_id } => Some(plugin_id),
            _ => None,
        }
    }
}
