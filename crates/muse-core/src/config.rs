use std::collections::HashMap;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{MuseError, Result};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Settings for one named LLM endpoint (`[llm.<name>]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_api_type")]
    pub api_type: String,
    #[serde(default)]
    pub http_referer: Option<String>,
    #[serde(default)]
    pub x_title: Option<String>,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    1.0
}

fn default_api_type() -> String {
    "openai".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeilisearchSettings {
    #[serde(default)]
    pub executable_path: Option<String>,
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default = "default_meili_addr")]
    pub http_addr: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub auto_start: bool,
}

fn default_meili_addr() -> String {
    "127.0.0.1:7700".to_string()
}

impl Default for MeilisearchSettings {
    fn default() -> Self {
        Self {
            executable_path: None,
            db_path: None,
            http_addr: default_meili_addr(),
            api_key: None,
            auto_start: false,
        }
    }
}

/// Defaults applied to a freshly created session clock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSettings {
    #[serde(default)]
    pub offset_seconds: f64,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default)]
    pub virtual_start: Option<String>,
}

fn default_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Directory holding the working database, the settings database, and the
    /// archives subdirectory.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Top-level config (muse.toml + MUSE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuseConfig {
    #[serde(default)]
    pub llm: HashMap<String, LlmSettings>,
    #[serde(default)]
    pub meilisearch: MeilisearchSettings,
    #[serde(default)]
    pub time: TimeSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub database: DatabaseSettings,
}

impl Default for MuseConfig {
    fn default() -> Self {
        Self {
            llm: HashMap::new(),
            meilisearch: MeilisearchSettings::default(),
            time: TimeSettings::default(),
            gateway: GatewaySettings::default(),
            database: DatabaseSettings::default(),
        }
    }
}

impl MuseConfig {
    /// Load config from an explicit path, `MUSE_CONFIG`, or `config/muse.toml`.
    /// Environment variables prefixed `MUSE_` override file values.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = path
            .map(PathBuf::from)
            .or_else(|| std::env::var("MUSE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/muse.toml"));

        let mut config: MuseConfig = Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed("MUSE_").split("__"))
            .extract()
            .map_err(|e| MuseError::Config(e.to_string()))?;

        config.alias_default_llm();
        Ok(config)
    }

    /// Mirror the `openai` entry as `default` when no explicit default exists.
    pub fn alias_default_llm(&mut self) {
        if !self.llm.contains_key("default") {
            if let Some(openai) = self.llm.get("openai").cloned() {
                self.llm.insert("default".to_string(), openai);
            }
        }
    }

    /// Resolve a named LLM config, falling back to `default`, `openai`,
    /// then any entry.
    pub fn llm_settings(&self, name: &str) -> Option<&LlmSettings> {
        self.llm
            .get(name)
            .or_else(|| self.llm.get("default"))
            .or_else(|| self.llm.get("openai"))
            .or_else(|| self.llm.values().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn openai_entry_is_aliased_as_default() {
        let mut dir = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        write!(
            dir,
            r#"
[llm.openai]
model = "gpt-4o"
base_url = "https://api.openai.com/v1"
api_key = "sk-test"

[gateway]
port = 9001
"#
        )
        .unwrap();
        let config = MuseConfig::load(dir.path().to_str()).unwrap();
        assert!(config.llm.contains_key("default"));
        assert_eq!(config.llm["default"].model, "gpt-4o");
        assert_eq!(config.gateway.port, 9001);
        assert_eq!(config.llm["openai"].max_tokens, 4096);
    }

    #[test]
    fn llm_settings_falls_back_through_names() {
        let mut config = MuseConfig::default();
        config.llm.insert(
            "openai".to_string(),
            LlmSettings {
                model: "gpt-4o-mini".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                max_tokens: 4096,
                temperature: 1.0,
                api_type: "openai".to_string(),
                http_referer: None,
                x_title: None,
            },
        );
        config.alias_default_llm();
        assert_eq!(config.llm_settings("missing").unwrap().model, "gpt-4o-mini");
    }
}
