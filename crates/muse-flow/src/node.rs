use std::sync::Arc;

use serde_json::{Map, Value};

use muse_agent::{ExecutionContext, Runnable};
use muse_llm::LlmClient;
use muse_memory::Stores;

pub type RunnableFactory = Box<dyn Fn(&ExecutionContext) -> Box<dyn Runnable> + Send + Sync>;
pub type InputAdapter = Box<dyn Fn(&ExecutionContext) -> ExecutionContext + Send + Sync>;
/// Receives the finished runnable's published outputs and the current flow
/// context; returns the updates to merge. An empty map is the explicit
/// "no valid output, do not touch the context" sentinel.
pub type OutputAdapter =
    Box<dyn Fn(&Map<String, Value>, &ExecutionContext) -> Map<String, Value> + Send + Sync>;
/// Returns the next node id, or None to end the flow gracefully.
pub type NextSelector = Box<dyn Fn(&ExecutionContext) -> Option<String> + Send + Sync>;

/// One unit of a flow graph.
pub struct FlowNode {
    pub id: String,
    pub name: String,
    pub runnable_factory: RunnableFactory,
    pub input_adapter: Option<InputAdapter>,
    pub output_adapter: Option<OutputAdapter>,
    pub next_selector: Option<NextSelector>,
    /// Background nodes (parallel flows only) may outlive the response stream.
    pub is_background: bool,
    /// Sequential flows stop after this node when the context has requested
    /// the response to stop.
    pub can_stop_response: bool,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, factory: RunnableFactory) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            runnable_factory: factory,
            input_adapter: None,
            output_adapter: None,
            next_selector: None,
            is_background: false,
            can_stop_response: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input_adapter(mut self, adapter: InputAdapter) -> Self {
        self.input_adapter = Some(adapter);
        self
    }

    pub fn with_output_adapter(mut self, adapter: OutputAdapter) -> Self {
        self.output_adapter = Some(adapter);
        self
    }

    pub fn with_next_selector(mut self, selector: NextSelector) -> Self {
        self.next_selector = Some(selector);
        self
    }

    pub fn background(mut self) -> Self {
        self.is_background = true;
        self
    }

    pub fn can_stop_response(mut self) -> Self {
        self.can_stop_response = true;
        self
    }
}

/// Everything the prebuilt topologies need to assemble their agents.
#[derive(Clone)]
pub struct FlowSpec {
    pub stores: Arc<Stores>,
    pub session_id: String,
    /// Character name; doubles as the dialogue speaker.
    pub name: String,
    pub roleplay_prompt: String,
    pub character_id: Option<String>,
    pub visible_for_characters: Option<Vec<String>>,
    /// Model used by the dialogue agents.
    pub chat_llm: Arc<LlmClient>,
    /// Model used by the planning/reflection agents.
    pub infer_llm: Arc<LlmClient>,
}

impl FlowSpec {
    pub fn agent_spec(&self, llm: Arc<LlmClient>) -> muse_agent::presets::AgentSpec {
        muse_agent::presets::AgentSpec {
            stores: self.stores.clone(),
            session_id: self.session_id.clone(),
            name: self.name.clone(),
            roleplay_prompt: self.roleplay_prompt.clone(),
            character_id: self.character_id.clone(),
            visible_for_characters: self.visible_for_characters.clone(),
            llm,
        }
    }
}
