// index.rs - Discovered plugins and the immutable index that holds them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use pt_manifest::{GoverningPolicy, Manifest, ValidationResult};
use serde::Serialize;

/// One plugin directory as seen by the last discovery pass.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredPlugin {
    /// Manifest id, or the directory name when the id could not be read.
    pub id: String,
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
    /// Validation outcome. Its `manifest` field is always empty; the typed
    /// manifest of a valid plugin lives in `manifest`.
    pub validation: ValidationResult,
    #[serde(skip)]
    pub manifest: Option<Arc<Manifest>>,
}

impl DiscoveredPlugin {
    pub fn is_valid(&self) -> bool {
        self.validation.valid && self.manifest.is_some()
    }

    /// Display name from the manifest, falling back to the id.
    pub fn name(&self) -> &str {
        self.manifest
            .as_deref()
            .map(|m| m.plugin.name.as_str())
            .unwrap_or(self.id.as_str())
    }

    pub fn governing_policy(&self) -> Option<GoverningPolicy> {
        self.manifest.as_deref().map(Manifest::governing_policy)
    }
}

/// Snapshot of every discovered plugin, keyed and ordered by id.
#[derive(Debug, Clone, Default)]
pub struct PluginIndex {
    plugins: BTreeMap<String, DiscoveredPlugin>,
}

impl PluginIndex {
    /// Build an index. On duplicate ids the first entry wins.
    pub fn from_plugins(plugins: impl IntoIterator<Item = DiscoveredPlugin>) -> Self {
        let mut map = BTreeMap::new();
        for plugin in plugins {
            map.entry(plugin.id.clone()).or_insert(plugin);
        }
        Self { plugins: map }
    }

    pub fn get(&self, id: &str) -> Option<&DiscoveredPlugin> {
        self.plugins.get(id)
    }

    /// The manifest of a valid plugin.
    pub fn manifest(&self, id: &str) -> Option<&Arc<Manifest>> {
        self.plugins.get(id).and_then(|p| p.manifest.as_ref())
    }

    /// All plugins, valid or not, in id order.
    pub fn plugins(&self) -> impl Iterator<Item = &DiscoveredPlugin> {
        self.plugins.values()
    }

    pub fn valid_plugins(&self) -> impl Iterator<Item = &DiscoveredPlugin> {
        self.plugins.values().filter(|p| p.is_valid())
    }

    pub fn invalid_plugins(&self) -> impl Iterator<Item = &DiscoveredPlugin> {
        self.plugins.values().filter(|p| !p.is_valid())
    }

    /// Valid plugins governed by `policy`.
    pub fn plugins_by_policy(&self, policy: GoverningPolicy) -> Vec<&DiscoveredPlugin> {
        self.valid_plugins()
            .filter(|p| p.governing_policy() == Some(policy))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
