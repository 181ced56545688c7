use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use muse_core::types::{ExecutionEvent, ExecutionState, InputMode, Message};

use crate::base::{AgentBehavior, AgentCore};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::runnable::EventEmitter;

/// Intake agent: persists the user's input with the category derived from the
/// input mode, and raises `skip_next_node` for COMMAND input so the flow ends
/// without waking the character.
pub struct UserAgent {
    core: AgentCore,
    pub skip_next_node: bool,
}

impl UserAgent {
    pub fn new(mut core: AgentCore) -> Self {
        core.max_steps = 1;
        Self {
            core,
            skip_next_node: false,
        }
    }
}

#[async_trait]
impl AgentBehavior for UserAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    async fn ingest_input(&mut self, ctx: &ExecutionContext) -> Result<()> {
        let input_mode = ctx.input_mode().unwrap_or(InputMode::Phone);

        if input_mode == InputMode::Command {
            self.skip_next_node = true;
            info!(agent = %self.core.name, "COMMAND input, character nodes will be skipped");
        }

        let input = ctx.user_input.as_deref().filter(|s| !s.trim().is_empty());
        if input_mode != InputMode::Skip {
            if let Some(input) = input {
                let message = Message::user(input, self.core.current_time())
                    .with_category(input_mode.category())
                    .with_visibility(ctx.visible_for_characters.clone());
                self.core.memory.add_message(message).await?;
                info!(
                    agent = %self.core.name,
                    category = input_mode.category().as_i64(),
                    "stored user input"
                );
            }
        }
        Ok(())
    }

    async fn step_stream(&mut self, emitter: &EventEmitter) -> Result<()> {
        emitter
            .emit(ExecutionEvent::tool_status("✅ user input processed"))
            .await;
        self.core.state = ExecutionState::Finished;
        Ok(())
    }

    fn behavior_outputs(&self) -> Map<String, Value> {
        let mut outputs = Map::new();
        outputs.insert("skip_next_node".to_string(), Value::Bool(self.skip_next_node));
        outputs
    }
}

crate::impl_agent_runnable!(UserAgent);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::{EventSender, Runnable};
    use crate::test_support::{core_with_memory, setup_stores};
    use muse_core::types::MessageCategory;
    use tokio::sync::mpsc;

    async fn run(agent: &mut UserAgent, ctx: ExecutionContext) {
        let (tx, mut rx): (EventSender, _) = mpsc::channel(64);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        agent.run_stream(ctx, tx).await.unwrap();
        drain.await.unwrap();
    }

    #[tokio::test]
    async fn stores_input_with_mode_category() {
        let (_dir, stores) = setup_stores();
        let mut agent = UserAgent::new(core_with_memory(&stores, "user"));
        let memory = agent.core.memory.clone();
        let ctx = ExecutionContext::new("s1")
            .with_user_input("hello")
            .with_input_mode(InputMode::InPerson);
        run(&mut agent, ctx).await;

        let (messages, _) = memory
            .get_messages_around_time(
                &memory.current_time(),
                1.0,
                10,
                Some(&[MessageCategory::SpeakInPerson.as_i64()]),
                None,
            )
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert!(!agent.skip_next_node);
    }

    #[tokio::test]
    async fn command_mode_raises_skip_flag() {
        let (_dir, stores) = setup_stores();
        let mut agent = UserAgent::new(core_with_memory(&stores, "user"));
        let ctx = ExecutionContext::new("s1")
            .with_user_input("/archive save")
            .with_input_mode(InputMode::Command);
        run(&mut agent, ctx).await;

        assert!(agent.skip_next_node);
        assert_eq!(
            agent.behavior_outputs().get("skip_next_node"),
            Some(&Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn skip_mode_stores_nothing() {
        let (_dir, stores) = setup_stores();
        let mut agent = UserAgent::new(core_with_memory(&stores, "user"));
        let memory = agent.core.memory.clone();
        let ctx = ExecutionContext::new("s1")
            .with_user_input("ignored")
            .with_input_mode(InputMode::Skip);
        run(&mut agent, ctx).await;

        let (messages, _) = memory
            .get_messages_around_time(&memory.current_time(), 1.0, 10, None, None)
            .unwrap();
        assert!(messages.is_empty());
    }
}
