use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Timestamp format used everywhere in the conversation domain.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Message role in an LLM transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// Message category — stored as an integer column, mirrored to the search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", from = "i64")]
pub enum MessageCategory {
    Normal,
    Telegram,
    SpeakInPerson,
    Thought,
    SystemInstruction,
}

impl MessageCategory {
    pub fn as_i64(self) -> i64 {
        match self {
            MessageCategory::Normal => 0,
            MessageCategory::Telegram => 1,
            MessageCategory::SpeakInPerson => 2,
            MessageCategory::Thought => 3,
            MessageCategory::SystemInstruction => 4,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => MessageCategory::Telegram,
            2 => MessageCategory::SpeakInPerson,
            3 => MessageCategory::Thought,
            4 => MessageCategory::SystemInstruction,
            _ => MessageCategory::Normal,
        }
    }

    /// Short tag used when reformatting dialogue history into prompt lines.
    pub fn indicator(self) -> &'static str {
        match self {
            MessageCategory::Telegram => "TELEGRAM",
            MessageCategory::SpeakInPerson => "SPEAK_IN_PERSON",
            MessageCategory::Thought => "THOUGHT",
            MessageCategory::SystemInstruction => "SYSTEM_INSTRUCTION",
            MessageCategory::Normal => "",
        }
    }

    /// The two categories that count as a dialogue turn.
    pub fn dialogue_categories() -> Vec<i64> {
        vec![
            MessageCategory::Telegram.as_i64(),
            MessageCategory::SpeakInPerson.as_i64(),
        ]
    }
}

impl From<MessageCategory> for i64 {
    fn from(c: MessageCategory) -> i64 {
        c.as_i64()
    }
}

impl From<i64> for MessageCategory {
    fn from(v: i64) -> Self {
        MessageCategory::from_i64(v)
    }
}

/// How the user delivered their input; routes both persistence category and flow behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    Phone,
    InPerson,
    InnerVoice,
    Command,
    Skip,
}

impl InputMode {
    pub fn category(self) -> MessageCategory {
        match self {
            InputMode::Phone => MessageCategory::Telegram,
            InputMode::InPerson => MessageCategory::SpeakInPerson,
            InputMode::InnerVoice => MessageCategory::Thought,
            InputMode::Command => MessageCategory::SystemInstruction,
            InputMode::Skip => MessageCategory::Normal,
        }
    }
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool call entry on an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default = "default_category")]
    pub category: MessageCategory,
    /// None means visible to every character.
    #[serde(default)]
    pub visible_for_characters: Option<Vec<String>>,
}

fn default_category() -> MessageCategory {
    MessageCategory::Normal
}

impl Message {
    pub fn user(content: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_name: None,
            speaker: Some("user".to_string()),
            tool_call_id: None,
            created_at: Some(created_at.into()),
            category: MessageCategory::Normal,
            visible_for_characters: None,
        }
    }

    pub fn system(content: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_name: None,
            speaker: Some("system".to_string()),
            tool_call_id: None,
            created_at: Some(created_at.into()),
            category: MessageCategory::Normal,
            visible_for_characters: None,
        }
    }

    pub fn assistant(content: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_name: None,
            speaker: Some("assistant".to_string()),
            tool_call_id: None,
            created_at: Some(created_at.into()),
            category: MessageCategory::Normal,
            visible_for_characters: None,
        }
    }

    pub fn tool(
        content: impl Into<String>,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_name: Some(tool_name.into()),
            speaker: None,
            tool_call_id: Some(tool_call_id.into()),
            created_at: Some(created_at.into()),
            category: MessageCategory::Normal,
            visible_for_characters: None,
        }
    }

    pub fn from_tool_calls(
        tool_calls: Vec<ToolCall>,
        content: Option<String>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_name: None,
            speaker: Some("assistant".to_string()),
            tool_call_id: None,
            created_at: Some(created_at.into()),
            category: MessageCategory::Normal,
            visible_for_characters: None,
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    pub fn with_category(mut self, category: MessageCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_visibility(mut self, visible: Option<Vec<String>>) -> Self {
        self.visible_for_characters = visible;
        self
    }

    /// Provider wire format. `tool_name` maps onto the OpenAI `name` field.
    pub fn to_wire(&self) -> Value {
        let mut obj = json!({ "role": self.role.as_str() });
        if let Some(content) = &self.content {
            obj["content"] = json!(content);
        }
        if let Some(calls) = &self.tool_calls {
            obj["tool_calls"] = json!(calls);
        }
        if let Some(name) = &self.tool_name {
            obj["name"] = json!(name);
        }
        if let Some(id) = &self.tool_call_id {
            obj["tool_call_id"] = json!(id);
        }
        obj
    }
}

/// Tells the caller whether more rows exist on either side of a query window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    #[serde(default)]
    pub has_more_before: bool,
    #[serde(default)]
    pub has_more_after: bool,
    #[serde(default)]
    pub time_point: Option<String>,
}

/// A scenario window bound to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub session_id: String,
    pub scenario_id: Option<String>,
    pub start_at: String,
    pub end_at: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A schedule entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub entry_id: String,
    pub session_id: String,
    pub start_at: String,
    pub end_at: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A one-off event window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    pub session_id: String,
    pub event_id: Option<String>,
    pub start_at: String,
    pub end_at: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A relationship record, stored in the typed KV space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub relation_id: String,
    pub session_id: String,
    pub name: String,
    #[serde(default)]
    pub knowledge: String,
    #[serde(default)]
    pub progress: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Execution lifecycle for agents and flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionState {
    Idle,
    Running,
    Finished,
    Error,
}

/// Event kinds carried on the streaming bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Token,
    ToolStatus,
    ToolOutput,
    Step,
    FlowStep,
    Final,
    Error,
    Done,
}

/// A single event emitted by a running agent or flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub step: Option<u32>,
    #[serde(default)]
    pub total_steps: Option<u32>,
    /// Routing tag for clients: tool name or modality (e.g. `send_telegram_message`).
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub execution_path: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl ExecutionEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            content: None,
            step: None,
            total_steps: None,
            message_type: None,
            message_id: None,
            execution_path: Vec::new(),
            metadata: None,
        }
    }

    pub fn token(content: impl Into<String>) -> Self {
        let mut e = Self::new(EventKind::Token);
        e.content = Some(content.into());
        e
    }

    pub fn tool_status(content: impl Into<String>) -> Self {
        let mut e = Self::new(EventKind::ToolStatus);
        e.content = Some(content.into());
        e
    }

    pub fn tool_output(content: impl Into<String>, message_type: impl Into<String>) -> Self {
        let mut e = Self::new(EventKind::ToolOutput);
        e.content = Some(content.into());
        e.message_type = Some(message_type.into());
        e
    }

    pub fn step(step: u32, total: u32, content: impl Into<String>) -> Self {
        let mut e = Self::new(EventKind::Step);
        e.content = Some(content.into());
        e.step = Some(step);
        e.total_steps = Some(total);
        e
    }

    pub fn flow_step(step: u32, content: impl Into<String>) -> Self {
        let mut e = Self::new(EventKind::FlowStep);
        e.content = Some(content.into());
        e.step = Some(step);
        e
    }

    pub fn final_event() -> Self {
        Self::new(EventKind::Final)
    }

    pub fn error(content: impl Into<String>) -> Self {
        let mut e = Self::new(EventKind::Error);
        e.content = Some(content.into());
        e
    }

    pub fn with_path_prefix(mut self, segment: &str) -> Self {
        self.execution_path.insert(0, segment.to_string());
        self
    }

    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_roundtrip() {
        for v in 0..5 {
            assert_eq!(MessageCategory::from_i64(v).as_i64(), v);
        }
        assert_eq!(MessageCategory::from_i64(99), MessageCategory::Normal);
    }

    #[test]
    fn input_mode_maps_to_category() {
        assert_eq!(InputMode::Phone.category(), MessageCategory::Telegram);
        assert_eq!(InputMode::InPerson.category(), MessageCategory::SpeakInPerson);
        assert_eq!(InputMode::InnerVoice.category(), MessageCategory::Thought);
        assert_eq!(InputMode::Command.category(), MessageCategory::SystemInstruction);
    }

    #[test]
    fn input_mode_serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&InputMode::InPerson).unwrap(), "\"in_person\"");
        let m: InputMode = serde_json::from_str("\"inner_voice\"").unwrap();
        assert_eq!(m, InputMode::InnerVoice);
    }

    #[test]
    fn tool_message_wire_format_uses_name_field() {
        let msg = Message::tool("done", "web_search", "call_1", "2024-01-15 14:30:00");
        let wire = msg.to_wire();
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["name"], "web_search");
        assert_eq!(wire["tool_call_id"], "call_1");
        assert!(wire.get("created_at").is_none());
    }

    #[test]
    fn assistant_wire_format_keeps_tool_calls() {
        let call = ToolCall {
            id: "call_0".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: "strategy".to_string(),
                arguments: "{}".to_string(),
            },
        };
        let msg = Message::from_tool_calls(vec![call], None, "2024-01-15 14:30:00");
        let wire = msg.to_wire();
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "strategy");
        assert!(wire.get("content").is_none());
    }
}
