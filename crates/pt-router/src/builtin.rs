// builtin.rs - Core intents: the fixed pattern table and the handler seam.
//
// Core patterns are regexes anchored at the start of the normalized query
// and matched case-insensitively. The first matching entry wins, so more
// specific patterns come before general ones.

use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::json;

use crate::error::RouterError;
use crate::route::RouteMatch;

/// Confidence reported for any core pattern match.
pub const CORE_CONFIDENCE: f64 = 0.95;

/// `(pattern, core intent)` pairs, in match order.
pub const CORE_PATTERNS: &[(&str, &str)] = &[
    // packages
    (r"install\s+(.+)", "install"),
    (r"remove\s+(.+)", "remove"),
    (r"uninstall\s+(.+)", "remove"),
    (r"search\s+(.+)", "search"),
    (r"find\s+(.+)", "search"),
    // configuration
    (r"generate\s+(.+)\s+config", "generate_config"),
    (r"create\s+(.+)\s+configuration", "generate_config"),
    (r"show\s+config", "show_config"),
    // system
    (r"rollback", "rollback"),
    (r"update\s+system", "update"),
    (r"check\s+health", "health_check"),
    // settings
    (r"settings", "settings"),
    (r"preferences", "settings"),
    (r"configure", "settings"),
];

#[derive(Debug, Clone)]
pub struct CoreIntent {
    pub name: String,
    pub source: String,
    regex: Regex,
}

impl CoreIntent {
    pub fn is_match(&self, normalized_query: &str) -> bool {
        self.regex.is_match(normalized_query)
    }
}

#[derive(Debug, Clone)]
pub struct CoreTable {
    intents: Vec<CoreIntent>,
}

impl CoreTable {
    /// The built-in table.
    pub fn standard() -> Result<Self, RouterError> {
        Self::new(CORE_PATTERNS.iter().copied())
    }

    pub fn new<'a>(patterns: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self, RouterError> {
        let intents = patterns
            .into_iter()
            .map(|(pattern, name)| {
                let regex = RegexBuilder::new(&format!("^(?:{pattern})"))
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| RouterError::InvalidCorePattern {
                        pattern: pattern.to_string(),
                        source,
                    })?;
                Ok(CoreIntent {
                    name: name.to_string(),
                    source: pattern.to_string(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>, RouterError>>()?;
        Ok(Self { intents })
    }

    /// First core intent matching the query.
    pub fn match_query(&self, normalized_query: &str) -> Option<&CoreIntent> {
        self.intents.iter().find(|i| i.is_match(normalized_query))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoreIntent> {
        self.intents.iter()
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

/// Handles requests routed to core. The real engine lives outside this
/// workspace and plugs in here.
#[async_trait]
pub trait CoreHandler: Send + Sync {
    async fn handle(
        &self,
        query: &str,
        route: &RouteMatch,
        context: &BTreeMap<String, serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Default core handler: reports the decision without acting on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredCoreHandler;

#[async_trait]
impl CoreHandler for DeferredCoreHandler {
    async fn handle(
        &self,
        query: &str,
        route: &RouteMatch,
        context: &BTreeMap<String, serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        Ok(json!({
            "intent": route.pattern,
            "confidence": route.confidence,
            "query": query,
            "message": format!("deferred to core: {query}"),
            "context": context,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_compiles() {
        let table = CoreTable::standard().unwrap();
        assert_eq!(table.len(), CORE_PATTERNS.len());
    }

    #[test]
    fn patterns_are_anchored_at_the_start() {
        let table = CoreTable::standard().unwrap();
        assert_eq!(table.match_query("install firefox").unwrap().name, "install");
        assert_eq!(table.match_query("INSTALL Firefox").unwrap().name, "install");
        assert_eq!(
            table.match_query("generate web server config").unwrap().name,
            "generate_config"
        );
        assert!(table.match_query("please install firefox").is_none());
        assert!(table.match_query("install").is_none());
        assert!(table.match_query("start focus session").is_none());
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = CoreTable::new([("(unclosed", "broken")]).unwrap_err();
        assert!(matches!(err, RouterError::InvalidCorePattern { .. }));
    }
}
