// prompt.rs - User-facing text: consent prompts and boundary summaries.

use std::fmt::Write as _;

use crate::consent::ConsentRequest;
use crate::manager::PermissionManager;

const SUMMARY_FORBIDDEN_SHOWN: usize = 5;

impl PermissionManager {
    /// Render the prompt the caller shows the user for a consent request.
    pub fn generate_consent_prompt(&self, request: &ConsentRequest) -> String {
        let permission = request.permission;
        let risk = permission.risk_level();
        let context = if request.context.is_empty() {
            "No additional context".to_string()
        } else {
            serde_json::to_string_pretty(&request.context)
                .unwrap_or_else(|_| format!("{:?}", request.context))
        };

        let mut out = String::new();
        let _ = writeln!(out, "Permission Request");
        let _ = writeln!(out, "==================");
        let _ = writeln!(out);
        let _ = writeln!(out, "Plugin: {}", request.plugin_id);
        let _ = writeln!(out, "Governing policy: {}", self.policy());
        if !self.promise().is_empty() {
            let _ = writeln!(out, "Promise: \"{}\"", self.promise());
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Request:");
        let _ = writeln!(out, "  Action: {}", request.action);
        let _ = writeln!(out, "  Permission: {}", permission);
        let _ = writeln!(out, "  Risk level: {}", risk.label());
        let _ = writeln!(out);
        let _ = writeln!(out, "What this means:");
        let _ = writeln!(out, "  {}", permission.explanation());
        let _ = writeln!(out);
        let _ = writeln!(out, "Context:");
        let _ = writeln!(out, "{}", context);
        let _ = writeln!(out);
        let _ = writeln!(out, "Do you grant this permission?");
        let _ = write!(out, "[Y]es / [N]o / [A]lways / [Never]");
        out
    }

    /// Human-readable summary of what this plugin may and may not do.
    pub fn boundaries_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Permission boundaries for {}", self.plugin_id());
        let _ = writeln!(out, "Governing policy: {}", self.policy());
        let _ = writeln!(out);

        let _ = writeln!(out, "Granted permissions:");
        if self.granted().is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for permission in self.granted() {
            let _ = writeln!(
                out,
                "  - {} (risk: {}{})",
                permission,
                permission.risk_level(),
                if self.needs_consent(*permission) {
                    ", asks first"
                } else {
                    ""
                }
            );
            let _ = writeln!(out, "    {}", permission.explanation());
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Forbidden actions:");
        let forbidden: Vec<&str> = self.forbidden_patterns().collect();
        for action in forbidden.iter().take(SUMMARY_FORBIDDEN_SHOWN) {
            let _ = writeln!(out, "  - {}", action);
        }
        if forbidden.len() > SUMMARY_FORBIDDEN_SHOWN {
            let _ = writeln!(
                out,
                "  ... and {} more",
                forbidden.len() - SUMMARY_FORBIDDEN_SHOWN
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Audit summary:");
        let total: usize = self.request_counts().values().sum();
        let _ = writeln!(out, "  Permission checks: {}", self.checks_performed());
        let _ = writeln!(out, "  Consent requests: {}", total);
        let mut counts: Vec<_> = self.request_counts().iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (permission, count) in counts {
            let _ = writeln!(out, "    {}: {}", permission, count);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pt_audit::MemoryAuditSink;
    use pt_manifest::{Manifest, Permission};
    use serde_json::json;

    use crate::manager::PermissionManager;

    fn manager() -> PermissionManager {
        let manifest: Manifest = serde_yaml::from_str(
            r#"
plugin:
  id: config-helper
  name: Config Helper
  version: "0.3"
  description: Explains and edits system configuration.
policy:
  governing_principle: enable_sovereignty
  sacred_promise: You stay in charge of your system.
capabilities:
  intents:
    - pattern: apply profile
      handler: apply_profile
  permissions:
    required: [configuration.read, configuration.write]
boundaries:
  forbidden_actions: [a, b, c, d, e, f, g]
"#,
        )
        .unwrap();
        PermissionManager::new(&manifest, Box::new(MemoryAuditSink::new()))
    }

    #[test]
    fn prompt_names_everything_the_user_needs() {
        let mut pm = manager();
        let request = pm
            .request_permission(
                "apply profile",
                Permission::ConfigurationWrite,
                BTreeMap::from([("profile".to_string(), json!("minimal"))]),
            )
            .unwrap();
        let prompt = pm.generate_consent_prompt(&request);

        assert!(prompt.contains("Plugin: config-helper"));
        assert!(prompt.contains("Governing policy: enable_sovereignty"));
        assert!(prompt.contains("You stay in charge of your system."));
        assert!(prompt.contains("Action: apply profile"));
        assert!(prompt.contains("Permission: configuration.write"));
        assert!(prompt.contains("Risk level: HIGH"));
        assert!(prompt.contains(Permission::ConfigurationWrite.explanation()));
        assert!(prompt.contains("\"profile\": \"minimal\""));
        assert!(prompt.ends_with("[Y]es / [N]o / [A]lways / [Never]"));
    }

    #[test]
    fn prompt_without_context_says_so() {
        let mut pm = manager();
        let request = pm
            .request_permission("read settings", Permission::ConfigurationRead, BTreeMap::new())
            .unwrap();
        assert!(pm
            .generate_consent_prompt(&request)
            .contains("No additional context"));
    }

    #[test]
    fn summary_truncates_forbidden_list() {
        let pm = manager();
        let summary = pm.boundaries_summary();
        assert!(summary.contains("configuration.write (risk: high, asks first)"));
        assert!(summary.contains("configuration.read (risk: low)"));
        assert!(summary.contains("... and 2 more"));
    }
}
