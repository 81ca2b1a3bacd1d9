// manifest.rs - Typed plugin manifest.
//
// Mirrors the on-disk layout:
//
//   plugin:        { id, name, version, description, author? }
//   policy:        { governing_principle, sacred_promise, ethical_boundaries }
//   capabilities:  { intents: [{pattern, handler, permissions?}], permissions: { required } }
//   boundaries:    { forbidden_actions, resource_limits?, data_policy? }
//
// The `policy` section is also accepted under its older name
// `consciousness`. A `Manifest` is only ever built by the validator after
// the document passed the fixed schema, and is immutable afterwards.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::permission::Permission;
use crate::policy::{DataSharing, GoverningPolicy};

/// A validated plugin contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_version: Option<String>,
    pub plugin: PluginInfo,
    #[serde(alias = "consciousness")]
    pub policy: PolicySection,
    pub capabilities: Capabilities,
    pub boundaries: Boundaries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorInfo>,
}

/// Author may be written as a bare name or as a small object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorInfo {
    Name(String),
    Detailed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySection {
    pub governing_principle: GoverningPolicy,
    /// Free text, only used for reporting and consent prompts.
    #[serde(default)]
    pub sacred_promise: String,
    #[serde(default)]
    pub ethical_boundaries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub intents: Vec<IntentDecl>,
    #[serde(default)]
    pub permissions: PermissionSet,
}

/// One declared intent: the pattern the router matches against and the
/// handler the sandbox invokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDecl {
    pub pattern: String,
    pub handler: String,
    /// Permissions the handler is known to need up front. These are checked
    /// before the handler is started.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    pub required: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundaries {
    pub forbidden_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,
    #[serde(default)]
    pub data_policy: DataPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_cpu_percent")]
    pub max_cpu_percent: u8,
    #[serde(default = "default_storage_mb")]
    pub max_storage_mb: u64,
    /// Wall-clock ceiling for one execution. Falls back to the host default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPolicy {
    #[serde(default)]
    pub sharing: DataSharing,
}

fn default_memory_mb() -> u64 {
    256
}

fn default_cpu_percent() -> u8 {
    10
}

fn default_storage_mb() -> u64 {
    100
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: default_memory_mb(),
            max_cpu_percent: default_cpu_percent(),
            max_storage_mb: default_storage_mb(),
            max_execution_secs: None,
        }
    }
}

impl ResourceLimits {
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    pub fn max_storage_bytes(&self) -> u64 {
        self.max_storage_mb.saturating_mul(1024 * 1024)
    }
}

impl Manifest {
    pub fn id(&self) -> &str {
        &self.plugin.id
    }

    pub fn governing_policy(&self) -> GoverningPolicy {
        self.policy.governing_principle
    }

    /// The permission set granted by the manifest.
    pub fn granted_permissions(&self) -> BTreeSet<Permission> {
        self.capabilities.permissions.required.iter().copied().collect()
    }

    /// Declared limits, or the host defaults when the manifest has none.
    pub fn effective_limits(&self) -> ResourceLimits {
        self.boundaries.resource_limits.unwrap_or_default()
    }

    /// Look up a declared intent by pattern (trimmed, case-insensitive).
    pub fn find_intent(&self, pattern: &str) -> Option<&IntentDecl> {
        let wanted = pattern.trim();
        self.capabilities
            .intents
            .iter()
            .find(|intent| intent.pattern.trim().eq_ignore_ascii_case(wanted))
    }

    /// Distinct handler names referenced by the declared intents.
    pub fn handler_names(&self) -> BTreeSet<&str> {
        self.capabilities
            .intents
            .iter()
            .map(|intent| intent.handler.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        serde_yaml::from_str(
            r#"
plugin:
  id: focus-keeper
  name: Focus Keeper
  version: "1.0.0"
  description: Keeps distractions away during deep work sessions.
consciousness:
  governing_principle: protect_attention
  sacred_promise: I will never interrupt you without reason.
capabilities:
  intents:
    - pattern: start focus session
      handler: begin_focus
    - pattern: stop focus session
      handler: end_focus
  permissions:
    required: [system.notifications, process.monitor]
boundaries:
  forbidden_actions: [send_data, track_browsing]
"#,
        )
        .unwrap()
    }

    #[test]
    fn consciousness_alias_is_accepted() {
        let manifest = sample();
        assert_eq!(
            manifest.governing_policy(),
            GoverningPolicy::ProtectAttention
        );
    }

    #[test]
    fn missing_limits_fall_back_to_defaults() {
        let limits = sample().effective_limits();
        assert_eq!(limits.max_memory_mb, 256);
        assert_eq!(limits.max_cpu_percent, 10);
        assert_eq!(limits.max_storage_mb, 100);
        assert_eq!(limits.max_execution_secs, None);
    }

    #[test]
    fn intent_lookup_ignores_case_and_padding() {
        let manifest = sample();
        let intent = manifest.find_intent("  Start Focus Session ").unwrap();
        assert_eq!(intent.handler, "begin_focus");
        assert!(manifest.find_intent("start focus").is_none());
    }

    #[test]
    fn granted_permissions_come_from_required() {
        let granted = sample().granted_permissions();
        assert!(granted.contains(&Permission::SystemNotifications));
        assert!(!granted.contains(&Permission::NetworkInternet));
    }

    #[test]
    fn author_accepts_both_shapes() {
        let plain: AuthorInfo = serde_json::from_str("\"Ada\"").unwrap();
        assert_eq!(plain, AuthorInfo::Name("Ada".into()));
        let detailed: AuthorInfo =
            serde_json::from_str(r#"{"name": "Ada", "email": "ada@example.org"}"#).unwrap();
        assert!(matches!(detailed, AuthorInfo::Detailed { .. }));
    }
}
