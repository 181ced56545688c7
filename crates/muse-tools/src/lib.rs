//! Tool system for the character agents.
//!
//! Each tool pairs a JSON-schema signature with an executor bound to a
//! session/character context. `speak_in_person` and `send_telegram_message`
//! produce inline user-visible text; every other tool's output is surfaced as
//! a side-channel `tool_output` event by the calling agent.

mod history;
mod reflection;
mod relation;
mod scenario;
mod schedule;
mod speak;
mod strategy;
mod telegram;
mod terminate;
mod web_search;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use muse_memory::Memory;

pub use history::DialogueHistory;
pub use reflection::Reflection;
pub use relation::RelationTool;
pub use scenario::{ScenarioReader, ScenarioWriter};
pub use schedule::{ScheduleReader, ScheduleWriter};
pub use speak::SpeakInPerson;
pub use strategy::Strategy;
pub use telegram::SendTelegramMessage;
pub use terminate::Terminate;
pub use web_search::WebSearch;

pub const SPEAK_IN_PERSON: &str = "speak_in_person";
pub const SEND_TELEGRAM_MESSAGE: &str = "send_telegram_message";
pub const TERMINATE: &str = "terminate";
pub const STRATEGY: &str = "strategy";

/// Tools whose output is spoken/sent text shown inline to the user.
pub fn is_inline_tool(name: &str) -> bool {
    matches!(name, SPEAK_IN_PERSON | SEND_TELEGRAM_MESSAGE)
}

/// Session/character context a tool executes against.
pub struct ToolContext {
    pub memory: Arc<Memory>,
    pub session_id: String,
    pub character_id: Option<String>,
    /// Speaker name recorded on messages the tool persists.
    pub speaker: String,
}

/// Result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, also used as the event `message_type`.
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the input parameters.
    fn input_schema(&self) -> Value;
    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult;
}

/// Ordered, name-keyed bag of tools.
#[derive(Default, Clone)]
pub struct ToolCollection {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolCollection {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Provider transport format.
    pub fn to_schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.input_schema(),
                    }
                })
            })
            .collect()
    }
}

pub(crate) fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolResult> {
    match input.get(field).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ToolResult::error(format!("'{field}' is required"))),
    }
}

pub(crate) fn optional_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use muse_clock::TimeProvider;
    use muse_core::config::MeilisearchSettings;
    use muse_memory::Stores;
    use muse_search::SearchService;
    use muse_storage::DatabaseManager;

    pub fn context(dir: &tempfile::TempDir) -> ToolContext {
        let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
        let clock = Arc::new(TimeProvider::new());
        let search = Arc::new(SearchService::new(&MeilisearchSettings::default()));
        let stores = Stores::new(db, clock, search);
        ToolContext {
            memory: Arc::new(Memory::new(stores, "s1")),
            session_id: "s1".to_string(),
            character_id: None,
            speaker: "Lina".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_preserves_order_and_names() {
        let collection = ToolCollection::new(vec![
            Arc::new(Strategy) as Arc<dyn Tool>,
            Arc::new(Terminate) as Arc<dyn Tool>,
        ]);
        assert_eq!(collection.names(), vec![STRATEGY, TERMINATE]);
        assert!(collection.get(TERMINATE).is_some());
        assert!(collection.get("missing").is_none());
    }

    #[test]
    fn schemas_use_provider_format() {
        let collection = ToolCollection::new(vec![Arc::new(Terminate) as Arc<dyn Tool>]);
        let schemas = collection.to_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["name"], TERMINATE);
        assert!(schemas[0]["function"]["parameters"].is_object());
    }

    #[test]
    fn inline_tools_are_exactly_the_speaking_pair() {
        assert!(is_inline_tool(SPEAK_IN_PERSON));
        assert!(is_inline_tool(SEND_TELEGRAM_MESSAGE));
        assert!(!is_inline_tool(STRATEGY));
        assert!(!is_inline_tool("dialogue_history"));
    }
}
