//! Injects a fixed set of response headers — grounded on the teacher's
//! `echo` plugin, which short-circuited the whole request with a canned
//! body; under the registered-plugin contract a plugin can no longer
//! synthesize a whole response (only `afterRequest` header mutation is
//! permitted, §4.7), so this keeps the teacher's `headers` config field and
//! drops the body-writing/short-circuit behavior.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{ProxyError, ProxyResult};
use crate::pipeline::{RequestContext, ResponseContext};

use super::ProxyPlugin;

pub const PLUGIN_NAME: &str = "echo";

#[derive(Default, Debug, Serialize, Deserialize)]
struct PluginConfig {
    #[serde(default)]
    headers: HashMap<String, String>,
}

pub fn create_echo_plugin(cfg: JsonValue) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let config: PluginConfig = if cfg.is_null() {
        PluginConfig::default()
    } else {
        serde_json::from_value(cfg)
            .map_err(|e| ProxyError::ConfigInvalid(format!("invalid echo plugin config: {e}")))?
    };
    Ok(Arc::new(PluginEcho { config }))
}

pub struct PluginEcho {
    config: PluginConfig,
}

#[async_trait]
impl ProxyPlugin for PluginEcho {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn after_request(
        &self,
        _ctx: &RequestContext,
        response: &mut ResponseContext,
    ) -> ProxyResult<()> {
        for (k, v) in &self.config.headers {
            response.headers.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::now_ms;

    #[tokio::test]
    async fn injects_configured_headers_into_the_response() {
        let plugin = create_echo_plugin(serde_json::json!({"headers": {"X-Demo": "1"}})).unwrap();
        let ctx = RequestContext::new("r1".into(), "1.2.3.4".into(), "GET".into(), "/x".into(), now_ms());
        let mut response = ResponseContext {
            status_code: 200,
            headers: Default::default(),
        };
        plugin.after_request(&ctx, &mut response).await.unwrap();
        assert_eq!(response.headers.get("X-Demo").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn empty_config_adds_no_headers() {
        let plugin = create_echo_plugin(serde_json::json!({})).unwrap();
        let ctx = RequestContext::new("r1".into(), "1.2.3.4".into(), "GET".into(), "/x".into(), now_ms());
        let mut response = ResponseContext {
            status_code: 200,
            headers: Default::default(),
        };
        plugin.after_request(&ctx, &mut response).await.unwrap();
        assert!(response.headers.is_empty());
    }
}
