// consent.rs - Consent requests and decisions.
//
// A `ConsentRequest` is created whenever an action needs an explicit user
// decision. The caller renders the prompt, asks the user, and hands a
// `ConsentDecision` back through `record_consent`.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use pt_manifest::Permission;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable request for a user decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub request_id: Uuid,
    pub plugin_id: String,
    pub permission: Permission,
    pub action: String,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ConsentRequest {
    pub fn new(
        plugin_id: impl Into<String>,
        permission: Permission,
        action: impl Into<String>,
        context: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            plugin_id: plugin_id.into(),
            permission,
            action: action.into(),
            context,
            timestamp: Utc::now(),
        }
    }
}

/// The user's answer to a consent request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentDecision {
    pub granted: bool,
    /// Cache the decision for this (permission, action) pair.
    pub remember: bool,
    /// How long a remembered decision stays valid. None = sandbox lifetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConsentDecision {
    /// Allow once.
    pub fn grant() -> Self {
        Self {
            granted: true,
            remember: false,
            duration_minutes: None,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    /// Refuse once.
    pub fn deny() -> Self {
        Self {
            granted: false,
            ..Self::grant()
        }
    }

    pub fn remembered(mut self) -> Self {
        self.remember = true;
        self
    }

    pub fn for_minutes(mut self, minutes: u32) -> Self {
        self.remember = true;
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Interpret a prompt reply: yes, no, always, never.
    pub fn from_reply(reply: &str) -> Option<Self> {
        match reply.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(Self::grant()),
            "n" | "no" => Some(Self::deny()),
            "a" | "always" => Some(Self::grant().remembered()),
            "never" => Some(Self::deny().remembered()),
            _ => None,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.duration_minutes
            .map(|m| self.timestamp + Duration::minutes(i64::from(m)))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map_or(false, |deadline| now >= deadline)
    }
}

/// Where a (permission, action) pair stands with respect to consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    /// The permission never needs an explicit decision.
    NotRequired,
    /// A cached or single-use grant covers the pair.
    Granted,
    /// A remembered denial covers the pair.
    Denied,
    /// A fresh decision is needed.
    Required,
}
