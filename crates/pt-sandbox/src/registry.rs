// registry.rs - Explicit plugin registration and lazy sandbox creation.
//
// Implementations are never discovered or loaded from disk: the host
// registers a factory per plugin id, and the first execution for that id
// builds its sandbox from the manifest the loader validated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use pt_manifest::Manifest;

use crate::error::SandboxError;
use crate::plugin::{Plugin, PluginFactory};
use crate::sandbox::{PluginSandbox, SandboxConfig};

pub struct SandboxRegistry {
    config: SandboxConfig,
    factories: RwLock<HashMap<String, PluginFactory>>,
    sandboxes: Mutex<HashMap<String, Arc<PluginSandbox>>>,
}

impl SandboxRegistry {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            factories: RwLock::new(HashMap::new()),
            sandboxes: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Register the factory for a plugin id, replacing any earlier one.
    /// An existing sandbox keeps its old instance until `evict`.
    pub fn register<F>(&self, plugin_id: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        let plugin_id = plugin_id.into();
        tracing::debug!(plugin_id = %plugin_id, "plugin implementation registered");
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(plugin_id, Arc::new(factory));
    }

    /// Register a single shared instance.
    pub fn register_instance(&self, plugin_id: impl Into<String>, plugin: Arc<dyn Plugin>) {
        self.register(plugin_id, move || Arc::clone(&plugin));
    }

    pub fn is_registered(&self, plugin_id: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(plugin_id)
    }

    /// The sandbox for a plugin, if one has been created.
    pub fn get(&self, plugin_id: &str) -> Option<Arc<PluginSandbox>> {
        self.sandboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(plugin_id)
            .cloned()
    }

    /// The sandbox for `manifest`'s plugin, created on first use.
    ///
    /// The sandbox is built without holding the map lock, so one plugin's
    /// setup never waits on another's. If two callers race on the same id,
    /// both get whichever sandbox was inserted first.
    pub fn get_or_create(&self, manifest: &Arc<Manifest>) -> Result<Arc<PluginSandbox>, SandboxError> {
        let plugin_id = manifest.id();
        if let Some(existing) = self.get(plugin_id) {
            return Ok(existing);
        }

        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| SandboxError::NotRegistered {
                plugin_id: plugin_id.to_string(),
            })?;

        let built = Arc::new(PluginSandbox::new(Arc::clone(manifest), factory(), &self.config)?);
        let mut sandboxes = self.sandboxes.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(
            sandboxes.entry(plugin_id.to_string()).or_insert(built),
        ))
    }

    /// Drop a plugin's sandbox so the next use rebuilds it, e.g. after its
    /// manifest changed on reload.
    pub fn evict(&self, plugin_id: &str) -> Option<Arc<PluginSandbox>> {
        self.sandboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(plugin_id)
    }

    /// Ids of plugins with a live sandbox, sorted.
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sandboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::context::PluginContext;

    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        fn handlers(&self) -> &[&'static str] {
            &["echo"]
        }

        async fn handle(
            &self,
            _handler: &str,
            payload: serde_json::Value,
            _ctx: &PluginContext,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(payload)
        }
    }

    fn manifest(id: &str) -> Arc<Manifest> {
        let yaml = format!(
            r#"
plugin:
  id: {id}
  name: Echo
  version: "1.0"
  description: Repeats whatever it is given back to the caller.
policy:
  governing_principle: protect_attention
capabilities:
  intents:
    - pattern: echo
      handler: echo
"#
        );
        Arc::new(serde_yaml::from_str(&yaml).unwrap())
    }

    #[test]
    fn unregistered_plugin_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SandboxRegistry::new(SandboxConfig::new(dir.path()));
        let err = registry.get_or_create(&manifest("ghost")).err().unwrap();
        assert!(matches!(err, SandboxError::NotRegistered { plugin_id } if plugin_id == "ghost"));
    }

    #[test]
    fn sandboxes_are_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SandboxRegistry::new(SandboxConfig::new(dir.path()));
        registry.register_instance("echo", Arc::new(Echo));
        assert!(registry.is_registered("echo"));
        assert!(registry.get("echo").is_none());

        let first = registry.get_or_create(&manifest("echo")).unwrap();
        let second = registry.get_or_create(&manifest("echo")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.active(), vec!["echo".to_string()]);

        registry.evict("echo");
        let third = registry.get_or_create(&manifest("echo")).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn racing_first_uses_share_one_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SandboxRegistry::new(SandboxConfig::new(dir.path())));
        registry.register_instance("echo", Arc::new(Echo));
        let barrier = Arc::new(std::sync::Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create(&manifest("echo")).unwrap()
                })
            })
            .collect();
        let sandboxes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for sandbox in &sandboxes[1..] {
            assert!(Arc::ptr_eq(&sandboxes[0], sandbox));
        }
        assert_eq!(registry.active(), vec!["echo".to_string()]);
    }

    #[test]
    fn building_one_sandbox_does_not_hold_the_map() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SandboxRegistry::new(SandboxConfig::new(dir.path())));
        registry.register_instance("echo", Arc::new(Echo));
        let (entered, wait_entered) = std::sync::mpsc::channel();
        let (release, wait_release) = std::sync::mpsc::channel::<()>();
        let wait_release = Mutex::new(wait_release);

        // A factory that stalls until released, standing in for slow setup.
        registry.register("slow", move || {
            let _ = entered.send(());
            let _ = wait_release.lock().unwrap().recv();
            Arc::new(Echo) as Arc<dyn Plugin>
        });

        let slow = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.get_or_create(&manifest("slow")).unwrap())
        };
        wait_entered.recv().unwrap();

        // The slow plugin is mid-creation; another plugin is not held up.
        let echo = registry.get_or_create(&manifest("echo")).unwrap();
        assert_eq!(echo.plugin_id(), "echo");

        release.send(()).unwrap();
        slow.join().unwrap();
        assert_eq!(registry.active(), vec!["echo".to_string(), "slow".to_string()]);
    }
}
