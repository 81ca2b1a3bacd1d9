// validator.rs - Manifest validation: parse, schema, semantic checks.
//
// `validate` is a pure function of the input bytes and the fixed schema:
//
// 1. Parse YAML or JSON. A parse failure is the single error, no warnings.
// 2. Walk the schema (see schema.rs). Every schema violation is an error.
// 3. For a schema-clean document, run semantic best-practice checks. These
//    only ever add warnings.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::error::ManifestError;
use crate::manifest::Manifest;
use crate::permission::RiskLevel;
use crate::policy::{DataSharing, GoverningPolicy};
use crate::schema::{self, ValidationIssue};

/// Serialization format of a manifest file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Json,
}

impl ManifestFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(ManifestFormat::Yaml),
            Some("json") => Some(ManifestFormat::Json),
            _ => None,
        }
    }
}

/// Outcome of validating one manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    /// The typed manifest, present only when `valid` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
}

impl ValidationResult {
    fn rejected(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: false,
            errors,
            warnings: Vec::new(),
            manifest: None,
        }
    }
}

/// Validates plugin manifests against the fixed schema.
#[derive(Debug, Clone)]
pub struct ManifestValidator {
    min_description_chars: usize,
    min_forbidden_actions: usize,
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self {
            min_description_chars: 50,
            min_forbidden_actions: 2,
        }
    }
}

impl ManifestValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate raw manifest bytes in the given format.
    pub fn validate(&self, bytes: &[u8], format: ManifestFormat) -> ValidationResult {
        let document: Value = match parse(bytes, format) {
            Ok(doc) => doc,
            Err(message) => {
                tracing::debug!(%message, "manifest failed to parse");
                return ValidationResult::rejected(vec![ValidationIssue::new("$", message)]);
            }
        };

        let issues = schema::check_document(&document);
        if !issues.is_empty() {
            return ValidationResult::rejected(issues);
        }

        // The schema guarantees the shape; a failure here means the two have
        // drifted apart, which is still reported rather than trusted.
        let manifest: Manifest = match serde_json::from_value(document) {
            Ok(m) => m,
            Err(e) => {
                let err = ManifestError::Shape(e.to_string());
                return ValidationResult::rejected(vec![ValidationIssue::new("$", err.to_string())]);
            }
        };

        let warnings = self.semantic_warnings(&manifest);
        ValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings,
            manifest: Some(manifest),
        }
    }

    /// Read and validate a manifest file, picking the format from its extension.
    pub fn validate_file(&self, path: &Path) -> Result<ValidationResult, ManifestError> {
        let format = ManifestFormat::from_path(path).ok_or_else(|| {
            ManifestError::UnsupportedFormat {
                path: path.to_path_buf(),
            }
        })?;
        let bytes = std::fs::read(path).map_err(|source| ManifestError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.validate(&bytes, format))
    }

    /// Best-practice checks over a schema-valid manifest.
    pub fn semantic_warnings(&self, manifest: &Manifest) -> Vec<String> {
        let mut warnings = Vec::new();

        let description_len = manifest.plugin.description.trim().chars().count();
        if description_len < self.min_description_chars {
            warnings.push(format!(
                "plugin.description is only {description_len} characters; \
                 describe what the plugin does in at least {} characters",
                self.min_description_chars
            ));
        }

        let forbidden = manifest.boundaries.forbidden_actions.len();
        if forbidden < self.min_forbidden_actions {
            warnings.push(format!(
                "only {forbidden} forbidden action(s) declared; declare at least {}",
                self.min_forbidden_actions
            ));
        }

        if manifest.boundaries.resource_limits.is_none() {
            warnings.push(
                "no resource limits declared; defaults of 256 MB memory, 10% CPU and \
                 100 MB storage apply"
                    .to_string(),
            );
        }

        let granted = manifest.granted_permissions();
        for permission in &granted {
            if let Some(read) = permission.read_counterpart() {
                if !granted.contains(&read) {
                    warnings.push(format!(
                        "permission '{permission}' is requested without '{read}'"
                    ));
                }
            }
        }

        let policy = manifest.governing_policy();
        let sharing = manifest.boundaries.data_policy.sharing;
        if policy == GoverningPolicy::PreservePrivacy && sharing != DataSharing::Never {
            warnings.push(format!(
                "governing principle '{policy}' conflicts with data sharing stance '{sharing}'"
            ));
        }

        for permission in &granted {
            if permission.risk_level() >= RiskLevel::Medium && !policy.allows(*permission) {
                warnings.push(format!(
                    "permission '{permission}' ({} risk) is not allowed by governing \
                     principle '{policy}' and requires user consent at runtime",
                    permission.risk_level()
                ));
            }
        }

        let mut seen = HashSet::new();
        for intent in &manifest.capabilities.intents {
            if !seen.insert(intent.pattern.trim().to_lowercase()) {
                warnings.push(format!(
                    "intent pattern '{}' is declared more than once; only the first is used",
                    intent.pattern
                ));
            }
            for permission in &intent.permissions {
                if !granted.contains(permission) {
                    warnings.push(format!(
                        "intent '{}' uses permission '{permission}' which is not listed in \
                         capabilities.permissions.required",
                        intent.pattern
                    ));
                }
            }
        }

        warnings
    }
}

fn parse(bytes: &[u8], format: ManifestFormat) -> Result<Value, String> {
    match format {
        ManifestFormat::Yaml => {
            serde_yaml::from_slice(bytes).map_err(|e| format!("invalid YAML: {e}"))
        }
        ManifestFormat::Json => {
            serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Permission;

    const GOOD: &str = r#"
plugin:
  id: focus-keeper
  name: Focus Keeper
  version: "1.0.0"
  description: Keeps distractions away during deep work sessions by muting notifications.
policy:
  governing_principle: protect_attention
  sacred_promise: I will never interrupt you without reason.
capabilities:
  intents:
    - pattern: start focus session
      handler: begin_focus
  permissions:
    required: [system.notifications, process.monitor]
boundaries:
  forbidden_actions: [send_data, track_browsing]
  resource_limits:
    max_memory_mb: 64
    max_cpu_percent: 5
    max_storage_mb: 10
"#;

    fn validate_yaml(text: &str) -> ValidationResult {
        ManifestValidator::new().validate(text.as_bytes(), ManifestFormat::Yaml)
    }

    #[test]
    fn clean_manifest_has_no_warnings() {
        let result = validate_yaml(GOOD);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(result.manifest.unwrap().id(), "focus-keeper");
    }

    #[test]
    fn parse_failure_is_one_error_and_no_warnings() {
        let result = validate_yaml("plugin: [unterminated");
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, "$");
        assert!(result.warnings.is_empty());
        assert!(result.manifest.is_none());
    }

    #[test]
    fn json_manifests_are_supported() {
        let value: serde_json::Value = serde_yaml::from_str(GOOD).unwrap();
        let bytes = serde_json::to_vec(&value).unwrap();
        let result = ManifestValidator::new().validate(&bytes, ManifestFormat::Json);
        assert!(result.valid);
    }

    #[test]
    fn limits_and_permissions_are_optional() {
        let text = GOOD
            .replace("  permissions:\n    required: [system.notifications, process.monitor]\n", "")
            .replace(
                "  resource_limits:\n    max_memory_mb: 64\n    max_cpu_percent: 5\n    max_storage_mb: 10\n",
                "",
            );
        let result = validate_yaml(&text);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("no resource limits")));
    }

    #[test]
    fn semantic_problems_only_warn() {
        let text = GOOD
            .replace(
                "description: Keeps distractions away during deep work sessions by muting notifications.",
                "description: Short.",
            )
            .replace("protect_attention", "preserve_privacy")
            .replace(
                "[system.notifications, process.monitor]",
                "[filesystem.write, network.internet]",
            )
            .replace("[send_data, track_browsing]", "[send_data]")
            .replace("  resource_limits:", "  data_policy:\n    sharing: always\n  resource_limits:");
        let result = validate_yaml(&text);
        assert!(result.valid, "{:?}", result.errors);
        let joined = result.warnings.join("\n");
        assert!(joined.contains("plugin.description"));
        assert!(joined.contains("forbidden action"));
        assert!(joined.contains("'filesystem.write' is requested without 'filesystem.read'"));
        assert!(joined.contains("data sharing stance 'always'"));
        assert!(joined.contains("network.internet"));
    }

    #[test]
    fn attention_policy_with_internet_warns() {
        let text = GOOD.replace(
            "[system.notifications, process.monitor]",
            "[system.notifications, network.internet]",
        );
        let result = validate_yaml(&text);
        assert!(result.valid);
        let warning = result
            .warnings
            .iter()
            .find(|w| w.contains("network.internet"))
            .unwrap();
        assert!(warning.contains("requires user consent at runtime"), "{warning}");
        assert!(!warning.contains("denied"), "{warning}");
    }

    #[test]
    fn missing_section_invalidates() {
        let text = GOOD.replace("policy:", "ignored:");
        let result = validate_yaml(&text);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, "policy");
    }

    #[test]
    fn intent_permission_outside_grant_warns() {
        let text = GOOD.replace(
            "      handler: begin_focus\n",
            "      handler: begin_focus\n      permissions: [process.spawn]\n",
        );
        let result = validate_yaml(&text);
        assert!(result.valid);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("'process.spawn' which is not listed")));
        let manifest = result.manifest.unwrap();
        assert_eq!(
            manifest.capabilities.intents[0].permissions,
            vec![Permission::ProcessSpawn]
        );
    }

    #[test]
    fn validate_file_picks_format_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.yml");
        std::fs::write(&path, GOOD).unwrap();
        let result = ManifestValidator::new().validate_file(&path).unwrap();
        assert!(result.valid);

        let other = dir.path().join("manifest.toml");
        std::fs::write(&other, "").unwrap();
        assert!(matches!(
            ManifestValidator::new().validate_file(&other),
            Err(ManifestError::UnsupportedFormat { .. })
        ));
    }
}
