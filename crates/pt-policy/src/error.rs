// error.rs - Error types for the permission manager.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// The audit sink refused an event. Decisions are not trusted without
    /// their audit entry, so this is surfaced rather than ignored.
    #[error("audit trail unavailable for plugin '{plugin_id}': {source}")]
    Audit {
        plugin_id: String,
        #[source]
        source: pt_audit::AuditError,
    },

    /// A consent request created by another plugin's manager.
    #[error("consent request {request_id} belongs to plugin '{owner}', not '{plugin_id}'")]
    ForeignRequest {
        request_id: Uuid,
        owner: String,
        plugin_id: String,
    },
}
