//! Forwards the pipeline-assigned request id to the origin as a request
//! header, grounded on the teacher's `request_id` plugin (which minted the
//! id itself); here id generation is the pipeline's job (§4.8 stage 1), so
//! this plugin only has to propagate it upstream via `beforeRequest`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{ProxyError, ProxyResult};
use crate::pipeline::RequestContext;

use super::ProxyPlugin;

pub const PLUGIN_NAME: &str = "request-id";
const DEFAULT_HEADER: &str = "X-Request-Id";

#[derive(Debug, Serialize, Deserialize)]
struct PluginConfig {
    #[serde(default = "PluginConfig::default_header_name")]
    header_name: String,
}

impl PluginConfig {
    fn default_header_name() -> String {
        DEFAULT_HEADER.to_string()
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            header_name: Self::default_header_name(),
        }
    }
}

pub struct PluginRequestId {
    config: PluginConfig,
}

pub fn create_request_id_plugin(cfg: JsonValue) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let config: PluginConfig = if cfg.is_null() {
        PluginConfig::default()
    } else {
        serde_json::from_value(cfg)
            .map_err(|e| ProxyError::ConfigInvalid(format!("invalid request-id plugin config: {e}")))?
    };
    Ok(Arc::new(PluginRequestId { config }))
}

#[async_trait]
impl ProxyPlugin for PluginRequestId {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn before_request(&self, ctx: &mut RequestContext) -> ProxyResult<()> {
        let request_id = ctx.request_id.clone();
        ctx.request_headers
            .insert(self.config.header_name.clone(), request_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::now_ms;

    #[tokio::test]
    async fn adds_the_pipeline_request_id_as_a_request_header() {
        let plugin = create_request_id_plugin(serde_json::json!({})).unwrap();
        let mut ctx = RequestContext::new("abc-123".into(), "1.2.3.4".into(), "GET".into(), "/x".into(), now_ms());
        plugin.before_request(&mut ctx).await.unwrap();
        assert_eq!(ctx.request_headers.get("X-Request-Id").unwrap(), "abc-123");
    }

    #[tokio::test]
    async fn custom_header_name_is_honored() {
        let plugin = create_request_id_plugin(serde_json::json!({"header_name": "X-Trace-Id"})).unwrap();
        let mut ctx = RequestContext::new("r1".into(), "1.2.3.4".into(), "GET".into(), "/x".into(), now_ms());
        plugin.before_request(&mut ctx).await.unwrap();
        assert_eq!(ctx.request_headers.get("X-Trace-Id").unwrap(), "r1");
    }
}
