// schema.rs - The fixed manifest schema and its walker.
//
// The schema is a static table of `Field`s. `check_document` walks a parsed
// document against it and reports every problem it can find in one pass,
// but at most one problem per field: once a field is known to be wrong,
// its children are not inspected.
//
// Paths are dotted with list indices, e.g. `capabilities.intents[0].handler`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::permission::Permission;
use crate::policy::{DataSharing, GoverningPolicy};

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted path to the offending field (`$` for the whole document).
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A string predicate with a human description of what it accepts.
pub struct Format {
    check: fn(&str) -> bool,
    expected: &'static str,
}

enum Kind {
    Text,
    NonEmptyText,
    Formatted(&'static Format),
    Integer { min: u64, max: u64 },
    Permission,
    Policy,
    Sharing,
    Author,
    List(&'static Kind),
    Object(&'static [Field]),
}

struct Field {
    name: &'static str,
    alias: Option<&'static str>,
    required: bool,
    kind: Kind,
}

impl Field {
    const fn required(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            alias: None,
            required: true,
            kind,
        }
    }

    const fn optional(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            alias: None,
            required: false,
            kind,
        }
    }

    const fn or_alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }
}

const PLUGIN_ID: Format = Format {
    check: is_plugin_id,
    expected: "lowercase letters, digits, '.', '_' or '-', starting with a letter or digit",
};

const VERSION: Format = Format {
    check: is_version,
    expected: "a version like 1.0 or 1.0.0",
};

const HANDLER: Format = Format {
    check: is_identifier,
    expected: "an identifier (letters, digits and '_')",
};

const PLUGIN_FIELDS: &[Field] = &[
    Field::required("id", Kind::Formatted(&PLUGIN_ID)),
    Field::required("name", Kind::NonEmptyText),
    Field::required("version", Kind::Formatted(&VERSION)),
    Field::required("description", Kind::Text),
    Field::optional("author", Kind::Author),
];

const POLICY_FIELDS: &[Field] = &[
    Field::required("governing_principle", Kind::Policy),
    Field::optional("sacred_promise", Kind::Text),
    Field::optional("ethical_boundaries", Kind::List(&Kind::Text)),
];

const INTENT_FIELDS: &[Field] = &[
    Field::required("pattern", Kind::NonEmptyText),
    Field::required("handler", Kind::Formatted(&HANDLER)),
    Field::optional("permissions", Kind::List(&Kind::Permission)),
];

const PERMISSION_FIELDS: &[Field] = &[Field::optional(
    "required",
    Kind::List(&Kind::Permission),
)];

const CAPABILITY_FIELDS: &[Field] = &[
    Field::required("intents", Kind::List(&Kind::Object(INTENT_FIELDS))),
    Field::optional("permissions", Kind::Object(PERMISSION_FIELDS)),
];

const LIMIT_FIELDS: &[Field] = &[
    Field::optional("max_memory_mb", Kind::Integer { min: 1, max: 1 << 20 }),
    Field::optional("max_cpu_percent", Kind::Integer { min: 1, max: 100 }),
    Field::optional("max_storage_mb", Kind::Integer { min: 1, max: 1 << 20 }),
    Field::optional("max_execution_secs", Kind::Integer { min: 1, max: 86_400 }),
];

const DATA_POLICY_FIELDS: &[Field] = &[Field::optional("sharing", Kind::Sharing)];

const BOUNDARY_FIELDS: &[Field] = &[
    Field::required("forbidden_actions", Kind::List(&Kind::NonEmptyText)),
    Field::optional("resource_limits", Kind::Object(LIMIT_FIELDS)),
    Field::optional("data_policy", Kind::Object(DATA_POLICY_FIELDS)),
];

const MANIFEST_FIELDS: &[Field] = &[
    Field::optional("manifest_version", Kind::Text),
    Field::required("plugin", Kind::Object(PLUGIN_FIELDS)),
    Field::required("policy", Kind::Object(POLICY_FIELDS)).or_alias("consciousness"),
    Field::required("capabilities", Kind::Object(CAPABILITY_FIELDS)),
    Field::required("boundaries", Kind::Object(BOUNDARY_FIELDS)),
];

/// Check a parsed document against the manifest schema.
///
/// Returns every violation found; an empty vector means the document has
/// the expected shape and can be deserialized into a `Manifest`.
pub fn check_document(document: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    match document {
        Value::Object(_) => check_fields(document, MANIFEST_FIELDS, "", &mut issues),
        other => issues.push(ValidationIssue::new(
            "$",
            format!("expected a mapping at the top level, found {}", type_name(other)),
        )),
    }
    issues
}

fn check_fields(object: &Value, fields: &[Field], path: &str, issues: &mut Vec<ValidationIssue>) {
    for field in fields {
        let child_path = join(path, field.name);
        let value = object
            .get(field.name)
            .or_else(|| field.alias.and_then(|alias| object.get(alias)))
            .filter(|v| !v.is_null());

        match value {
            Some(v) => check_value(v, &field.kind, &child_path, issues),
            None if field.required => {
                let message = match field.alias {
                    Some(alias) => format!("required property is missing (also accepted as '{alias}')"),
                    None => "required property is missing".to_string(),
                };
                issues.push(ValidationIssue::new(child_path, message));
            }
            None => {}
        }
    }
}

fn check_value(value: &Value, kind: &Kind, path: &str, issues: &mut Vec<ValidationIssue>) {
    let problem = match kind {
        Kind::Text => expect_str(value).err(),
        Kind::NonEmptyText => match expect_str(value) {
            Ok(s) if s.trim().is_empty() => Some("must not be empty".to_string()),
            Ok(_) => None,
            Err(e) => Some(e),
        },
        Kind::Formatted(format) => match expect_str(value) {
            Ok(s) if !(format.check)(s) => {
                Some(format!("'{s}' is not valid: expected {}", format.expected))
            }
            Ok(_) => None,
            Err(e) => Some(e),
        },
        Kind::Integer { min, max } => match value.as_u64() {
            Some(n) if n < *min || n > *max => {
                Some(format!("{n} is out of range: expected {min}..={max}"))
            }
            Some(_) => None,
            None => Some(format!(
                "expected an integer in {min}..={max}, found {}",
                describe(value)
            )),
        },
        Kind::Permission => closed_set(value, |s| s.parse::<Permission>().is_ok(), || {
            Permission::ALL.iter().map(|p| p.as_str()).collect()
        }),
        Kind::Policy => closed_set(value, |s| s.parse::<GoverningPolicy>().is_ok(), || {
            GoverningPolicy::ALL.iter().map(|p| p.as_str()).collect()
        }),
        Kind::Sharing => closed_set(value, |s| s.parse::<DataSharing>().is_ok(), || {
            DataSharing::ALL.iter().map(|d| d.as_str()).collect()
        }),
        Kind::Author => match value {
            Value::String(_) => None,
            Value::Object(map) if map.get("name").map_or(false, Value::is_string) => None,
            other => Some(format!(
                "expected a name or a mapping with 'name', found {}",
                type_name(other)
            )),
        },
        Kind::List(item) => match value {
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    check_value(v, item, &format!("{path}[{i}]"), issues);
                }
                None
            }
            other => Some(format!("expected a list, found {}", type_name(other))),
        },
        Kind::Object(fields) => match value {
            Value::Object(_) => {
                check_fields(value, fields, path, issues);
                None
            }
            other => Some(format!("expected a mapping, found {}", type_name(other))),
        },
    };

    if let Some(message) = problem {
        issues.push(ValidationIssue::new(path, message));
    }
}

fn expect_str(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected a string, found {}", type_name(value)))
}

fn closed_set(
    value: &Value,
    accepts: impl Fn(&str) -> bool,
    choices: impl Fn() -> Vec<&'static str>,
) -> Option<String> {
    match expect_str(value) {
        Ok(s) if accepts(s) => None,
        Ok(s) => Some(format!("'{s}' is not one of: {}", choices().join(", "))),
        Err(e) => Some(e),
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_u64() || n.is_i64() => "an integer",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        other => type_name(other).to_string(),
    }
}

fn is_plugin_id(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

fn is_version(s: &str) -> bool {
    // Major.minor with an optional patch; anything after the numeric core
    // (pre-release tags, build metadata) is accepted.
    let core_end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let parts: Vec<&str> = s[..core_end].split('.').collect();
    (2..=3).contains(&parts.len())
        && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        && (core_end == s.len() || matches!(s.as_bytes()[core_end], b'-' | b'+'))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "plugin": {
                "id": "focus-keeper",
                "name": "Focus Keeper",
                "version": "1.0.0",
                "description": "Keeps distractions away."
            },
            "policy": { "governing_principle": "protect_attention" },
            "capabilities": {
                "intents": [{ "pattern": "start focus session", "handler": "begin_focus" }]
            },
            "boundaries": { "forbidden_actions": ["send_data"] }
        })
    }

    fn paths(issues: &[ValidationIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.path.as_str()).collect()
    }

    #[test]
    fn minimal_document_passes() {
        assert!(check_document(&minimal()).is_empty());
    }

    #[test]
    fn legacy_section_name_is_accepted() {
        let mut doc = minimal();
        let section = doc["policy"].take();
        doc.as_object_mut().unwrap().remove("policy");
        doc["consciousness"] = section;
        assert!(check_document(&doc).is_empty());
    }

    #[test]
    fn missing_policy_section_is_reported_once() {
        let mut doc = minimal();
        doc.as_object_mut().unwrap().remove("policy");
        let issues = check_document(&doc);
        assert_eq!(paths(&issues), vec!["policy"]);
        assert!(issues[0].message.contains("consciousness"));
    }

    #[test]
    fn all_problems_are_reported_in_one_pass() {
        let mut doc = minimal();
        doc["plugin"]["version"] = json!("one");
        doc["capabilities"]["intents"][0]["handler"] = json!(42);
        doc["boundaries"]["resource_limits"] = json!({ "max_cpu_percent": 400 });
        let issues = check_document(&doc);
        assert_eq!(
            paths(&issues),
            vec![
                "plugin.version",
                "capabilities.intents[0].handler",
                "boundaries.resource_limits.max_cpu_percent",
            ]
        );
    }

    #[test]
    fn wrong_section_type_hides_children() {
        let mut doc = minimal();
        doc["plugin"] = json!("focus-keeper");
        let issues = check_document(&doc);
        assert_eq!(paths(&issues), vec!["plugin"]);
    }

    #[test]
    fn unknown_enumerations_are_rejected() {
        let mut doc = minimal();
        doc["policy"]["governing_principle"] = json!("maximize_engagement");
        doc["capabilities"]["permissions"] = json!({ "required": ["filesystem.read", "root.access"] });
        doc["boundaries"]["data_policy"] = json!({ "sharing": "sometimes" });
        let issues = check_document(&doc);
        assert_eq!(
            paths(&issues),
            vec![
                "policy.governing_principle",
                "capabilities.permissions.required[1]",
                "boundaries.data_policy.sharing",
            ]
        );
        assert!(issues[1].message.contains("root.access"));
    }

    #[test]
    fn non_mapping_document_is_rejected() {
        let issues = check_document(&json!(["plugin"]));
        assert_eq!(paths(&issues), vec!["$"]);
    }

    #[test]
    fn plugin_id_format() {
        assert!(is_plugin_id("flow-guardian"));
        assert!(is_plugin_id("a.b_c-1"));
        assert!(!is_plugin_id("Flow"));
        assert!(!is_plugin_id("-flow"));
        assert!(!is_plugin_id(""));
    }

    #[test]
    fn version_format() {
        assert!(is_version("1.0"));
        assert!(is_version("1.2.3"));
        assert!(is_version("1.2.3-beta.1"));
        assert!(!is_version("1"));
        assert!(!is_version("1.2.3.4"));
        assert!(!is_version("v1.0"));
        assert!(!is_version("1..2"));
        assert!(!is_version("1.2."));
        assert!(!is_version("1.2.."));
        assert!(!is_version("1.2.-rc1"));
    }
}
