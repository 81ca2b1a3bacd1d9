// event.rs - Audit event data model.
//
// One event per permission check, consent request, consent decision or
// execution. Events in a log are chained through `previous_hash`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of step this event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// `can_perform` was evaluated for an action.
    PermissionCheck,
    /// A consent request was created and handed to the caller.
    ConsentRequested,
    /// The caller returned a consent decision.
    ConsentDecision,
    /// A handler ran to completion.
    Execution,
    /// A sandbox boundary stopped an execution.
    Violation,
    /// The caller dropped an in-flight execution.
    ExecutionCancelled,
    /// A handler failed, timed out or exceeded a resource limit.
    Error,
}

/// A single audit event, one line in a JSONL audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Plugin the event concerns.
    pub plugin_id: String,
    pub action: AuditAction,
    /// Permission wire string (e.g. "filesystem.read"), when one applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    /// The plugin action or intent being checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Correlates a consent decision with the request it answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    /// Hash of the previous line in the log. None for the first event.
    pub previous_hash: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    pub fn new(plugin_id: impl Into<String>, action: AuditAction) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            plugin_id: plugin_id.into(),
            action,
            permission: None,
            target: None,
            request_id: None,
            previous_hash: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_request(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted() {
        let event = AuditEvent::new("focus-keeper", AuditAction::Execution);
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("permission").is_none());
        assert!(json.get("target").is_none());
        assert!(json.get("request_id").is_none());
    }

    #[test]
    fn builder_sets_fields() {
        let request = Uuid::new_v4();
        let event = AuditEvent::new("focus-keeper", AuditAction::ConsentDecision)
            .with_permission("configuration.write")
            .with_target("apply_profile")
            .with_request(request)
            .with_metadata(serde_json::json!({ "granted": false }));
        assert_eq!(event.permission.as_deref(), Some("configuration.write"));
        assert_eq!(event.target.as_deref(), Some("apply_profile"));
        assert_eq!(event.request_id, Some(request));
        assert_eq!(event.metadata["granted"], false);
    }

    #[test]
    fn action_serializes_as_snake_case() {
        let json = serde_json::to_string(&AuditAction::ExecutionCancelled).unwrap();
        assert_eq!(json, "\"execution_cancelled\"");
    }
}
