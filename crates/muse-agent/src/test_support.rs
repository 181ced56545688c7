use std::sync::Arc;

use muse_clock::TimeProvider;
use muse_core::config::{LlmSettings, MeilisearchSettings};
use muse_llm::LlmClient;
use muse_memory::{Memory, Stores};
use muse_search::SearchService;
use muse_storage::DatabaseManager;

use crate::base::AgentCore;

pub fn setup_stores() -> (tempfile::TempDir, Arc<Stores>) {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
    let clock = Arc::new(TimeProvider::new());
    let search = Arc::new(SearchService::new(&MeilisearchSettings::default()));
    (dir, Stores::new(db, clock, search))
}

pub fn test_llm() -> Arc<LlmClient> {
    Arc::new(LlmClient::new(LlmSettings {
        model: "test-model".to_string(),
        base_url: "http://127.0.0.1:1/v1".to_string(),
        api_key: String::new(),
        max_tokens: 256,
        temperature: 1.0,
        api_type: "openai".to_string(),
        http_referer: None,
        x_title: None,
    }))
}

pub fn core_with_memory(stores: &Arc<Stores>, name: &str) -> AgentCore {
    let memory = Arc::new(Memory::new(stores.clone(), "s1"));
    AgentCore::new(name, "s1", memory, test_llm())
}
