use serde_json::{Map, Value};

use muse_core::types::InputMode;

/// Shared state flowing through the execution graph. Immutable-update
/// discipline: `set`/`merge` return new values; the original is never mutated.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub session_id: String,
    pub user_input: Option<String>,
    pub data: Map<String, Value>,
    pub stop_response_requested: bool,
    pub character_id: Option<String>,
    /// None means messages are visible to every character.
    pub visible_for_characters: Option<Vec<String>>,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_input: None,
            data: Map::new(),
            stop_response_requested: false,
            character_id: None,
            visible_for_characters: None,
        }
    }

    pub fn with_user_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }

    pub fn with_character(mut self, character_id: Option<String>) -> Self {
        self.character_id = character_id;
        self
    }

    pub fn with_visibility(mut self, visible: Option<Vec<String>>) -> Self {
        self.visible_for_characters = visible;
        self
    }

    pub fn with_input_mode(self, mode: InputMode) -> Self {
        self.set("input_mode", serde_json::to_value(mode).expect("input mode serializes"))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.data.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn input_mode(&self) -> Option<InputMode> {
        self.data
            .get("input_mode")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Return a new context with one key set.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.data.insert(key.into(), value);
        next
    }

    /// Return a new context with `updates` merged in. An empty map is a no-op
    /// sentinel: the context is returned unchanged.
    pub fn merge(&self, updates: Map<String, Value>) -> Self {
        if updates.is_empty() {
            return self.clone();
        }
        let mut next = self.clone();
        next.data.extend(updates);
        next
    }

    pub fn clear_user_input(&self) -> Self {
        let mut next = self.clone();
        next.user_input = None;
        next
    }

    pub fn request_stop_response(&self) -> Self {
        let mut next = self.clone();
        next.stop_response_requested = true;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_and_merge_do_not_mutate_original() {
        let ctx = ExecutionContext::new("s1");
        let updated = ctx.set("decision", json!("telegram"));
        assert!(ctx.get("decision").is_none());
        assert_eq!(updated.get_str("decision"), Some("telegram"));

        let mut updates = Map::new();
        updates.insert("strategy".to_string(), json!("be brief"));
        let merged = updated.merge(updates);
        assert!(updated.get("strategy").is_none());
        assert_eq!(merged.get_str("strategy"), Some("be brief"));
    }

    #[test]
    fn empty_merge_is_a_no_op() {
        let ctx = ExecutionContext::new("s1").set("k", json!(1));
        let merged = ctx.merge(Map::new());
        assert_eq!(merged.get("k"), Some(&json!(1)));
    }

    #[test]
    fn input_mode_roundtrip() {
        let ctx = ExecutionContext::new("s1").with_input_mode(InputMode::InPerson);
        assert_eq!(ctx.input_mode(), Some(InputMode::InPerson));
    }
}
