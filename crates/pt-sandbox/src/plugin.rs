// plugin.rs - The interface every plugin implementation provides.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::PluginContext;

/// A plugin implementation.
///
/// `handlers` lists every handler name the plugin answers to; sandbox
/// creation fails if the manifest declares an intent whose handler is not
/// in this list. `handle` is only ever called with one of those names.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn handlers(&self) -> &[&'static str];

    /// Run one handler. Anything the handler needs from the host must go
    /// through `ctx`.
    async fn handle(
        &self,
        handler: &str,
        payload: serde_json::Value,
        ctx: &PluginContext,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Builds a plugin instance. Registered per plugin id.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;
