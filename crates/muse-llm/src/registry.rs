use std::sync::Arc;

use dashmap::DashMap;

use muse_core::config::{LlmSettings, MuseConfig};

use crate::client::LlmClient;
use crate::error::{LlmError, Result};

/// Clients keyed by configuration name for connection reuse. Per-request
/// model overrides build uncached clients.
pub struct LlmRegistry {
    config: MuseConfig,
    clients: DashMap<String, Arc<LlmClient>>,
}

impl LlmRegistry {
    pub fn new(config: MuseConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    /// Resolve a named client, falling back through `default` and `openai`.
    pub fn get(&self, name: &str) -> Result<Arc<LlmClient>> {
        if let Some(client) = self.clients.get(name) {
            return Ok(client.clone());
        }
        let settings = self
            .config
            .llm_settings(name)
            .cloned()
            .ok_or_else(|| LlmError::UnknownConfig(name.to_string()))?;
        let client = Arc::new(LlmClient::new(settings));
        self.clients.insert(name.to_string(), client.clone());
        Ok(client)
    }

    /// Build a one-off client from request-supplied settings.
    pub fn from_settings(&self, settings: LlmSettings) -> Arc<LlmClient> {
        Arc::new(LlmClient::new(settings))
    }

    pub fn default_model(&self) -> Option<String> {
        self.config.llm_settings("openai").map(|s| s.model.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_config_without_fallbacks_errors() {
        let registry = LlmRegistry::new(MuseConfig::default());
        assert!(matches!(registry.get("missing"), Err(LlmError::UnknownConfig(_))));
    }

    #[test]
    fn named_clients_are_cached() {
        let mut config = MuseConfig::default();
        config.llm.insert(
            "openai".to_string(),
            LlmSettings {
                model: "gpt-4o".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                max_tokens: 4096,
                temperature: 1.0,
                api_type: "openai".to_string(),
                http_referer: None,
                x_title: None,
            },
        );
        let registry = LlmRegistry::new(config);
        let a = registry.get("openai").unwrap();
        let b = registry.get("openai").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
