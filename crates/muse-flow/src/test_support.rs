use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use muse_agent::{AgentError, EventSender, ExecutionContext, Result, Runnable};
use muse_clock::TimeProvider;
use muse_core::config::{LlmSettings, MeilisearchSettings};
use muse_core::types::{ExecutionEvent, ExecutionState};
use muse_llm::LlmClient;
use muse_memory::Stores;
use muse_search::SearchService;
use muse_storage::DatabaseManager;

use crate::node::{FlowNode, FlowSpec};

pub fn flow_spec() -> (tempfile::TempDir, FlowSpec) {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
    let clock = Arc::new(TimeProvider::new());
    let search = Arc::new(SearchService::new(&MeilisearchSettings::default()));
    let stores = Stores::new(db, clock, search);
    let llm = Arc::new(LlmClient::new(LlmSettings {
        model: "test-model".to_string(),
        base_url: "http://127.0.0.1:1/v1".to_string(),
        api_key: String::new(),
        max_tokens: 256,
        temperature: 1.0,
        api_type: "openai".to_string(),
        http_referer: None,
        x_title: None,
    }));
    let spec = FlowSpec {
        stores,
        session_id: "s1".to_string(),
        name: "Lina".to_string(),
        roleplay_prompt: "rp".to_string(),
        character_id: Some("char-a".to_string()),
        visible_for_characters: None,
        chat_llm: llm.clone(),
        infer_llm: llm,
    };
    (dir, spec)
}

/// Shared record of which probe nodes actually ran.
#[derive(Default, Clone)]
pub struct ProbeLog {
    visits: Arc<Mutex<Vec<String>>>,
}

impl ProbeLog {
    pub fn record(&self, node_id: &str) {
        self.visits.lock().unwrap().push(node_id.to_string());
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }
}

struct ProbeRunnable {
    id: String,
    state: ExecutionState,
    log: ProbeLog,
    delay: Option<Duration>,
    fail: bool,
}

#[async_trait]
impl Runnable for ProbeRunnable {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ExecutionState {
        self.state
    }

    async fn run_stream(&mut self, _ctx: ExecutionContext, tx: EventSender) -> Result<()> {
        self.state = ExecutionState::Running;
        if self.fail {
            self.state = ExecutionState::Error;
            return Err(AgentError::Flow("probe failure".to_string()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.record(&self.id);
        let _ = tx.send(ExecutionEvent::token(format!("ran {}", self.id))).await;
        let _ = tx.send(ExecutionEvent::final_event()).await;
        self.state = ExecutionState::Finished;
        Ok(())
    }

    fn outputs(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut outputs = serde_json::Map::new();
        outputs.insert(
            "probe".to_string(),
            serde_json::Value::String(self.id.clone()),
        );
        outputs
    }
}

pub fn probe_node(id: &str, log: &ProbeLog) -> FlowNode {
    let id_owned = id.to_string();
    let log = log.clone();
    FlowNode::new(
        id,
        Box::new(move |_| {
            Box::new(ProbeRunnable {
                id: id_owned.clone(),
                state: ExecutionState::Idle,
                log: log.clone(),
                delay: None,
                fail: false,
            })
        }),
    )
}

pub fn slow_probe_node(id: &str, log: &ProbeLog, delay: Duration) -> FlowNode {
    let id_owned = id.to_string();
    let log = log.clone();
    FlowNode::new(
        id,
        Box::new(move |_| {
            Box::new(ProbeRunnable {
                id: id_owned.clone(),
                state: ExecutionState::Idle,
                log: log.clone(),
                delay: Some(delay),
                fail: false,
            })
        }),
    )
}

pub fn failing_node(id: &str) -> FlowNode {
    let id_owned = id.to_string();
    FlowNode::new(
        id,
        Box::new(move |_| {
            Box::new(ProbeRunnable {
                id: id_owned.clone(),
                state: ExecutionState::Idle,
                log: ProbeLog::default(),
                delay: None,
                fail: true,
            })
        }),
    )
}
