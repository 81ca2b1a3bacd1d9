// route.rs - Route decisions and plugin pattern scoring.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Who handles a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "plugin_id", rename_all = "snake_case")]
pub enum RouteTarget {
    Core,
    Plugin(String),
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Core => write!(f, "core"),
            RouteTarget::Plugin(id) => write!(f, "plugin {id}"),
        }
    }
}

/// The router's decision for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMatch {
    pub confidence: f64,
    pub target: RouteTarget,
    /// Core intent name, the matched plugin intent pattern, or `unknown`.
    pub pattern: String,
}

impl RouteMatch {
    pub(crate) fn core(confidence: f64, pattern: impl Into<String>) -> Self {
        Self {
            confidence,
            target: RouteTarget::Core,
            pattern: pattern.into(),
        }
    }

    pub(crate) fn plugin(confidence: f64, plugin_id: &str, pattern: &str) -> Self {
        Self {
            confidence,
            target: RouteTarget::Plugin(plugin_id.to_string()),
            pattern: pattern.to_string(),
        }
    }

    pub fn is_plugin(&self) -> bool {
        matches!(self.target, RouteTarget::Plugin(_))
    }

    pub fn plugin_id(&self) -> Option<&str> {
        match &self.target {
            RouteTarget::Plugin(id) => Some(id),
            RouteTarget::Core => None,
        }
    }
}

/// Score a normalized (trimmed, lowercased) query against one declared
/// intent pattern:
///
/// - 1.0 when they are equal
/// - 0.8 when the pattern occurs in the query
/// - 0.7 when every pattern word occurs in the query
/// - 0.4 + 0.2 × (shared words / pattern words) when some words are shared
/// - 0.0 otherwise
pub fn pattern_confidence(normalized_query: &str, pattern: &str) -> f64 {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() {
        return 0.0;
    }
    if normalized_query == pattern {
        return 1.0;
    }
    if normalized_query.contains(&pattern) {
        return 0.8;
    }

    let pattern_words: HashSet<&str> = pattern.split_whitespace().collect();
    let query_words: HashSet<&str> = normalized_query.split_whitespace().collect();
    let shared = pattern_words.intersection(&query_words).count();
    if shared == pattern_words.len() {
        return 0.7;
    }
    if shared > 0 {
        return 0.4 + 0.2 * shared as f64 / pattern_words.len() as f64;
    }
    0.0
}

pub(crate) fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}
