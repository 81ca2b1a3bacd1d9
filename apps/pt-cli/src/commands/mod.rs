pub mod audit;
pub mod plugins;
pub mod route;
pub mod validate;

use std::sync::Arc;

use pt_loader::{PluginIndex, PluginLoader};
use pt_router::{HostConfig, IntentRouter};
use pt_sandbox::SandboxRegistry;

/// Discover plugins with the configured root and depth.
pub fn discover(config: &HostConfig) -> anyhow::Result<Arc<PluginIndex>> {
    let loader = PluginLoader::new(&config.plugins_dir).with_max_depth(config.loader.discovery_depth);
    let index = loader.discover()?;
    for plugin in index.invalid_plugins() {
        tracing::debug!(
            plugin_id = %plugin.id,
            manifest = %plugin.manifest_path.display(),
            errors = plugin.validation.errors.len(),
            "skipping rejected plugin"
        );
    }
    Ok(index)
}

/// A router over freshly discovered plugins. Nothing is registered with
/// its sandbox registry, so it is only good for routing decisions.
pub fn router(config: &HostConfig) -> anyhow::Result<IntentRouter> {
    let index = discover(config)?;
    let registry = Arc::new(SandboxRegistry::new(config.sandbox_config()));
    Ok(IntentRouter::from_config(config, index, registry)?)
}
