//! Plugin Host (C8, §4.7): lifecycle-hook dispatcher that lets user modules
//! observe and mutate the request/response and cache events.
//!
//! Source proxies of this shape load duck-typed modules at runtime; per
//! §9's "Dynamic plugin loading" design note this rewrite replaces that
//! with a registered plugin interface (a capability set of named hooks)
//! populated by statically-linked, compiled-in plugins — the registry
//! below, grounded on the teacher's `build_plugin` factory-function table
//! (`proxy/plugin.rs`), generalized from per-route plugin chains to one
//! global, config-ordered hook table.

pub mod echo;
pub mod file_logger;
pub mod request_id;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;

use crate::config::PluginConfigEntry;
use crate::error::{ProxyError, ProxyResult};
use crate::pipeline::{RequestContext, ResponseContext};

/// One named lifecycle hook set (§4.7). Every hook has a no-op default so a
/// plugin only needs to implement what it cares about.
#[async_trait]
pub trait ProxyPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn on_server_start(&self) {}

    /// May mutate `ctx.request_headers` only (§4.7 contract).
    async fn before_request(&self, _ctx: &mut RequestContext) -> ProxyResult<()> {
        Ok(())
    }

    /// May mutate `response.headers` only (§4.7 contract).
    async fn after_request(
        &self,
        _ctx: &RequestContext,
        _response: &mut ResponseContext,
    ) -> ProxyResult<()> {
        Ok(())
    }

    async fn on_cache_hit(&self, _ctx: &RequestContext) {}
    async fn on_cache_miss(&self, _ctx: &RequestContext) {}
    async fn on_cache_store(&self, _ctx: &RequestContext) {}
    async fn on_error(&self, _ctx: &RequestContext, _stage: &str, _message: &str) {}
    async fn on_server_stop(&self) {}
}

pub type PluginCreateFn = fn(JsonValue) -> ProxyResult<Arc<dyn ProxyPlugin>>;

static PLUGIN_BUILDER_REGISTRY: Lazy<HashMap<&'static str, PluginCreateFn>> = Lazy::new(|| {
    let entries: Vec<(&str, PluginCreateFn)> = vec![
        (file_logger::PLUGIN_NAME, file_logger::create_file_logger_plugin),
        (echo::PLUGIN_NAME, echo::create_echo_plugin),
        (request_id::PLUGIN_NAME, request_id::create_request_id_plugin),
    ];
    entries.into_iter().collect()
});

/// Looks up a plugin's factory function in the global registry and invokes
/// it with that plugin's own configuration block.
pub fn build_plugin(name: &str, cfg: JsonValue) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let builder = PLUGIN_BUILDER_REGISTRY
        .get(name)
        .ok_or_else(|| ProxyError::ConfigInvalid(format!("unknown plugin type: {name}")))?;
    builder(cfg)
}

/// The ordered hook table (§5 "Plugin host state"): frozen after startup,
/// built once from the configuration's `plugins` list in declaration order.
pub struct PluginHost {
    plugins: Vec<Arc<dyn ProxyPlugin>>,
}

impl PluginHost {
    pub fn from_config(entries: &[PluginConfigEntry]) -> ProxyResult<PluginHost> {
        let mut plugins = Vec::new();
        for entry in entries {
            if !entry.enabled {
                continue;
            }
            let plugin = build_plugin(&entry.name, entry.config.clone())?;
            plugins.push(plugin);
        }
        Ok(PluginHost { plugins })
    }

    pub fn empty() -> PluginHost {
        PluginHost { plugins: Vec::new() }
    }

    pub async fn on_server_start(&self) {
        for plugin in &self.plugins {
            plugin.on_server_start().await;
        }
    }

    pub async fn on_server_stop(&self) {
        for plugin in &self.plugins {
            plugin.on_server_stop().await;
        }
    }

    /// Runs `beforeRequest` for every plugin in load order. A plugin that
    /// fails is logged and recorded in `ctx.plugin_errors`; the dispatcher
    /// never aborts the request because of it (§4.7).
    pub async fn before_request(&self, ctx: &mut RequestContext) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.before_request(ctx).await {
                self.record_fault(ctx, plugin.name(), &e.to_string());
            }
        }
    }

    pub async fn after_request(&self, ctx: &mut RequestContext, response: &mut ResponseContext) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.after_request(ctx, response).await {
                self.record_fault(ctx, plugin.name(), &e.to_string());
            }
        }
    }

    pub async fn on_cache_hit(&self, ctx: &RequestContext) {
        for plugin in &self.plugins {
            plugin.on_cache_hit(ctx).await;
        }
    }

    pub async fn on_cache_miss(&self, ctx: &RequestContext) {
        for plugin in &self.plugins {
            plugin.on_cache_miss(ctx).await;
        }
    }

    pub async fn on_cache_store(&self, ctx: &RequestContext) {
        for plugin in &self.plugins {
            plugin.on_cache_store(ctx).await;
        }
    }

    pub async fn on_error(&self, ctx: &RequestContext, stage: &str, message: &str) {
        for plugin in &self.plugins {
            plugin.on_error(ctx, stage, message).await;
        }
    }

    fn record_fault(&self, ctx: &mut RequestContext, plugin: &str, message: &str) {
        log::warn!("plugin '{plugin}' faulted: {message}");
        ctx.plugin_errors.push(format!("{plugin}: {message}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::now_ms;

    struct Failing;

    #[async_trait]
    impl ProxyPlugin for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn before_request(&self, _ctx: &mut RequestContext) -> ProxyResult<()> {
            Err(ProxyError::PluginFault {
                plugin: "failing".into(),
                message: "boom".into(),
            })
        }
    }

    struct Mutating;

    #[async_trait]
    impl ProxyPlugin for Mutating {
        fn name(&self) -> &str {
            "mutating"
        }

        async fn before_request(&self, ctx: &mut RequestContext) -> ProxyResult<()> {
            ctx.request_headers.insert("x-added".into(), "1".into());
            Ok(())
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("r1".into(), "1.2.3.4".into(), "GET".into(), "/x".into(), now_ms())
    }

    #[tokio::test]
    async fn a_failing_plugin_never_aborts_the_request_and_is_recorded() {
        let host = PluginHost {
            plugins: vec![Arc::new(Failing), Arc::new(Mutating)],
        };
        let mut c = ctx();
        host.before_request(&mut c).await;
        assert_eq!(c.plugin_errors.len(), 1);
        assert!(c.plugin_errors[0].contains("failing"));
        // the plugin after the failing one still ran.
        assert_eq!(c.request_headers.get("x-added").map(String::as_str), Some("1"));
    }

    #[test]
    fn unknown_plugin_name_is_config_invalid() {
        let err = build_plugin("does-not-exist", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ProxyError::ConfigInvalid(_)));
    }
}
