// router.rs - IntentRouter: route, cache, dispatch.
//
// Routing order for a query:
//
// 1. Cache, keyed by the raw query string.
// 2. Core table. Any match wins outright with confidence 0.95.
// 3. Every intent of every valid plugin, scored by `pattern_confidence`.
//    Plugins are visited in id order and intents in declared order; a
//    later candidate must score strictly higher to replace the best so
//    far, so ties resolve the same way every time.
// 4. The best plugin match is used when it scores above the dispatch
//    floor; otherwise the query goes to core as `unknown` with confidence 0.3.
//
// The router never builds permission state. Sandboxes come from the
// registry, keyed by plugin id.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use pt_loader::PluginIndex;
use pt_manifest::GoverningPolicy;
use pt_policy::{ConsentDecision, ConsentRequest};
use pt_sandbox::{ExecutionOutcome, SandboxRegistry};
use serde::Serialize;
use serde_json::json;

use crate::builtin::{CoreHandler, CoreTable, DeferredCoreHandler, CORE_CONFIDENCE};
use crate::config::HostConfig;
use crate::error::RouterError;
use crate::route::{normalize, pattern_confidence, RouteMatch, RouteTarget};

/// Confidence of the core fallback for queries nothing claimed.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

const SUGGESTION_LIMIT: usize = 3;
const REPORT_EXAMPLES: [&str; 4] = [
    "install firefox",
    "start focus session",
    "check interruptions",
    "generate web server config",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Core,
    Plugin,
}

/// What `execute` hands back to the caller.
#[derive(Debug, Clone)]
pub enum RouterResponse {
    Handled {
        source: ResponseSource,
        route: RouteMatch,
        payload: serde_json::Value,
    },
    /// Show `prompt`, pass the answer to `record_consent`, then resubmit.
    ConsentRequired {
        plugin_id: String,
        request: ConsentRequest,
        prompt: String,
    },
}

/// A plugin that might be relevant to a query it was not routed to.
#[derive(Debug, Clone, Serialize)]
pub struct PluginSuggestion {
    pub plugin_id: String,
    pub plugin_name: String,
    pub description: String,
    pub relevance: f64,
    pub governing_policy: GoverningPolicy,
}

pub struct IntentRouter {
    core: CoreTable,
    core_handler: Arc<dyn CoreHandler>,
    index: RwLock<Arc<PluginIndex>>,
    registry: Arc<SandboxRegistry>,
    cache: Mutex<HashMap<String, RouteMatch>>,
    min_confidence: f64,
    cache_capacity: usize,
}

impl IntentRouter {
    /// A router over `index` with the built-in core table, the deferred
    /// core handler and default tunables.
    pub fn new(index: Arc<PluginIndex>, registry: Arc<SandboxRegistry>) -> Result<Self, RouterError> {
        Ok(Self {
            core: CoreTable::standard()?,
            core_handler: Arc::new(DeferredCoreHandler),
            index: RwLock::new(index),
            registry,
            cache: Mutex::new(HashMap::new()),
            min_confidence: 0.4,
            cache_capacity: 1024,
        })
    }

    /// A router using the tunables from `config`.
    pub fn from_config(
        config: &HostConfig,
        index: Arc<PluginIndex>,
        registry: Arc<SandboxRegistry>,
    ) -> Result<Self, RouterError> {
        Ok(Self::new(index, registry)?
            .with_min_confidence(config.router.min_dispatch_confidence)
            .with_cache_capacity(config.router.route_cache_capacity))
    }

    pub fn with_core_table(mut self, core: CoreTable) -> Self {
        self.core = core;
        self
    }

    pub fn with_core_handler(mut self, handler: Arc<dyn CoreHandler>) -> Self {
        self.core_handler = handler;
        self
    }

    pub fn with_min_confidence(mut self, floor: f64) -> Self {
        self.min_confidence = floor.clamp(0.0, 1.0);
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn index(&self) -> Arc<PluginIndex> {
        Arc::clone(&self.index.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn registry(&self) -> &Arc<SandboxRegistry> {
        &self.registry
    }

    /// Decide who handles `query`.
    pub fn route(&self, query: &str) -> RouteMatch {
        if let Some(hit) = self.lock_cache().get(query) {
            return hit.clone();
        }

        let route = self.decide(query, &self.index());
        tracing::debug!(
            query,
            target = %route.target,
            pattern = %route.pattern,
            confidence = route.confidence,
            "route decided"
        );

        let mut cache = self.lock_cache();
        if cache.len() < self.cache_capacity || cache.contains_key(query) {
            cache.insert(query.to_string(), route.clone());
        }
        route
    }

    /// Up to three plugins with medium relevance (strictly between 0.3 and
    /// 0.8), most relevant first.
    pub fn get_plugin_suggestions(&self, query: &str) -> Vec<PluginSuggestion> {
        let normalized = normalize(query);
        let index = self.index();
        let mut suggestions: Vec<PluginSuggestion> = index
            .valid_plugins()
            .filter_map(|plugin| {
                let manifest = plugin.manifest.as_ref()?;
                let relevance = manifest
                    .capabilities
                    .intents
                    .iter()
                    .map(|intent| pattern_confidence(&normalized, &intent.pattern))
                    .fold(0.0, f64::max);
                (relevance > 0.3 && relevance < 0.8).then(|| PluginSuggestion {
                    plugin_id: plugin.id.clone(),
                    plugin_name: manifest.plugin.name.clone(),
                    description: manifest.policy.sacred_promise.clone(),
                    relevance,
                    governing_policy: manifest.governing_policy(),
                })
            })
            .collect();
        suggestions.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        suggestions.truncate(SUGGESTION_LIMIT);
        suggestions
    }

    /// Route `query` and run it: through the core handler, or inside the
    /// matched plugin's sandbox with payload `{query, context}`.
    pub async fn execute(
        &self,
        query: &str,
        context: BTreeMap<String, serde_json::Value>,
    ) -> Result<RouterResponse, RouterError> {
        let route = self.route(query);
        let plugin_id = match &route.target {
            RouteTarget::Core => {
                let payload = self
                    .core_handler
                    .handle(query, &route, &context)
                    .await
                    .map_err(|e| RouterError::Core {
                        message: format!("{e:#}"),
                    })?;
                return Ok(RouterResponse::Handled {
                    source: ResponseSource::Core,
                    route,
                    payload,
                });
            }
            RouteTarget::Plugin(id) => id.clone(),
        };

        let manifest = self
            .index()
            .manifest(&plugin_id)
            .cloned()
            .ok_or_else(|| RouterError::UnknownPlugin {
                plugin_id: plugin_id.clone(),
            })?;
        let sandbox = self.registry.get_or_create(&manifest)?;

        let payload = json!({ "query": query, "context": context });
        match sandbox
            .execute_with_context(&route.pattern, payload, context)
            .await?
        {
            ExecutionOutcome::Completed(result) => Ok(RouterResponse::Handled {
                source: ResponseSource::Plugin,
                route,
                payload: result.output,
            }),
            ExecutionOutcome::ConsentRequired { request, prompt } => {
                tracing::info!(plugin_id = %plugin_id, permission = %request.permission, "consent required before dispatch");
                Ok(RouterResponse::ConsentRequired {
                    plugin_id,
                    request,
                    prompt,
                })
            }
        }
    }

    /// Pass the user's answer to a consent request back to the plugin's sandbox.
    pub fn record_consent(
        &self,
        plugin_id: &str,
        request: &ConsentRequest,
        decision: ConsentDecision,
    ) -> Result<(), RouterError> {
        let sandbox = self
            .registry
            .get(plugin_id)
            .ok_or_else(|| RouterError::NoSandbox {
                plugin_id: plugin_id.to_string(),
            })?;
        sandbox.handle_consent_response(request, decision)?;
        Ok(())
    }

    /// Swap in a new plugin index. Clears the route cache and drops
    /// sandboxes whose manifest changed or disappeared.
    pub fn reload(&self, index: Arc<PluginIndex>) {
        for plugin_id in self.registry.active() {
            let unchanged = match (self.registry.get(&plugin_id), index.manifest(&plugin_id)) {
                (Some(sandbox), Some(manifest)) => **sandbox.manifest() == **manifest,
                _ => false,
            };
            if !unchanged {
                tracing::info!(plugin_id = %plugin_id, "plugin manifest changed; sandbox dropped");
                self.registry.evict(&plugin_id);
            }
        }
        *self.index.write().unwrap_or_else(|e| e.into_inner()) = index;
        self.clear_cache();
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    pub fn cached_routes(&self) -> usize {
        self.lock_cache().len()
    }

    /// Human-readable overview of what the router can dispatch.
    pub fn routing_report(&self) -> String {
        let index = self.index();
        let plugin_patterns: usize = index
            .valid_plugins()
            .filter_map(|p| p.manifest.as_ref())
            .map(|m| m.capabilities.intents.len())
            .sum();

        let mut out = String::new();
        let _ = writeln!(out, "Routing report");
        let _ = writeln!(out, "==============");
        let _ = writeln!(out);
        let _ = writeln!(out, "Statistics:");
        let _ = writeln!(out, "  Core patterns: {}", self.core.len());
        let _ = writeln!(out, "  Plugin patterns: {}", plugin_patterns);
        let _ = writeln!(out, "  Valid plugins: {}", index.valid_plugins().count());
        let _ = writeln!(out, "  Rejected plugins: {}", index.invalid_plugins().count());
        let _ = writeln!(out, "  Cached routes: {}", self.cached_routes());
        let _ = writeln!(out, "  Dispatch floor: {:.2}", self.min_confidence);

        let _ = writeln!(out);
        let _ = writeln!(out, "Core capabilities:");
        for intent in self.core.iter().take(5) {
            let _ = writeln!(out, "  - {} ({})", intent.source, intent.name);
        }
        if self.core.len() > 5 {
            let _ = writeln!(out, "  ... and {} more", self.core.len() - 5);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Plugin capabilities:");
        for plugin in index.valid_plugins().take(3) {
            let Some(manifest) = plugin.manifest.as_ref() else {
                continue;
            };
            let _ = writeln!(out, "  {} ({}):", manifest.plugin.name, plugin.id);
            for intent in manifest.capabilities.intents.iter().take(2) {
                let _ = writeln!(out, "    - \"{}\"", intent.pattern);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Example routes:");
        for example in REPORT_EXAMPLES {
            let route = self.decide(example, &index);
            let _ = writeln!(
                out,
                "  \"{}\" -> {} [{}, confidence {:.0}%]",
                example,
                route.target,
                route.pattern,
                route.confidence * 100.0
            );
        }
        out
    }

    fn decide(&self, query: &str, index: &PluginIndex) -> RouteMatch {
        let normalized = normalize(query);
        if let Some(core) = self.core.match_query(&normalized) {
            return RouteMatch::core(CORE_CONFIDENCE, core.name.clone());
        }

        let mut best: Option<RouteMatch> = None;
        for plugin in index.valid_plugins() {
            let Some(manifest) = plugin.manifest.as_ref() else {
                continue;
            };
            for intent in &manifest.capabilities.intents {
                let confidence = pattern_confidence(&normalized, &intent.pattern);
                if confidence > best.as_ref().map_or(0.0, |b| b.confidence) {
                    best = Some(RouteMatch::plugin(confidence, &plugin.id, &intent.pattern));
                }
            }
        }

        match best {
            Some(route) if route.confidence > self.min_confidence => route,
            _ => RouteMatch::core(FALLBACK_CONFIDENCE, "unknown"),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, RouteMatch>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
