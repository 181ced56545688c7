use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use muse_core::types::{ExecutionEvent, ExecutionState, Message, Role};
use muse_llm::LlmClient;
use muse_memory::Memory;

use crate::context::ExecutionContext;
use crate::error::{AgentError, Result};
use crate::runnable::{EventEmitter, EventSender};

const STUCK_PROMPT: &str =
    "Observed duplicate responses. Consider new strategies and avoid repeating \
     ineffective paths already attempted.";

/// State shared by every agent implementation.
pub struct AgentCore {
    pub id: String,
    pub name: String,
    pub session_id: String,
    pub state: ExecutionState,
    pub memory: Arc<Memory>,
    pub llm: Arc<LlmClient>,
    pub max_steps: u32,
    pub current_step: u32,
    pub character_id: Option<String>,
    pub visible_for_characters: Option<Vec<String>>,
    pub system_prompt: Option<String>,
    pub next_step_prompt: Option<String>,
    pub duplicate_threshold: usize,
    pub result: String,
}

impl AgentCore {
    pub fn new(
        name: impl Into<String>,
        session_id: impl Into<String>,
        memory: Arc<Memory>,
        llm: Arc<LlmClient>,
    ) -> Self {
        let name = name.into();
        let id = format!("agent-{}-{}", name, short_id());
        Self {
            id,
            name,
            session_id: session_id.into(),
            state: ExecutionState::Idle,
            memory,
            llm,
            max_steps: 10,
            current_step: 0,
            character_id: None,
            visible_for_characters: None,
            system_prompt: None,
            next_step_prompt: None,
            duplicate_threshold: 2,
            result: String::new(),
        }
    }

    pub fn current_time(&self) -> String {
        self.memory.current_time()
    }

    /// Duplicate-content heuristic: the newest assistant message equals the
    /// content of at least `duplicate_threshold` earlier assistant messages.
    /// Tool turns in between are not considered, so a step that ends on a
    /// tool reply still compares the assistant content behind it.
    pub fn is_stuck(&self) -> bool {
        let messages = self.memory.recent_messages();
        let Some(last_assistant) = messages.iter().rposition(|m| m.role == Role::Assistant)
        else {
            return false;
        };
        let Some(content) = messages[last_assistant]
            .content
            .as_deref()
            .filter(|c| !c.is_empty())
        else {
            return false;
        };
        let duplicates = messages[..last_assistant]
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant && m.content.as_deref() == Some(content))
            .count();
        duplicates >= self.duplicate_threshold
    }

    /// Prepend the change-strategy nudge to the next step's prompt.
    pub fn handle_stuck(&mut self) {
        let existing = self.next_step_prompt.take().unwrap_or_default();
        self.next_step_prompt = Some(if existing.is_empty() {
            STUCK_PROMPT.to_string()
        } else {
            format!("{STUCK_PROMPT}\n{existing}")
        });
        warn!(agent = %self.name, "agent detected stuck state, nudging strategy");
    }
}

pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// The per-agent hooks the shared driver loop calls.
#[async_trait]
pub trait AgentBehavior: Send {
    fn core(&self) -> &AgentCore;
    fn core_mut(&mut self) -> &mut AgentCore;

    /// Ingest user input before the step loop. The default appends a user
    /// message stamped with virtual now and the context's visibility.
    async fn ingest_input(&mut self, ctx: &ExecutionContext) -> Result<()> {
        let Some(input) = ctx.user_input.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(());
        };
        let core = self.core();
        let message = Message::user(input, core.current_time())
            .with_visibility(ctx.visible_for_characters.clone());
        let memory = core.memory.clone();
        memory.add_message(message).await?;
        Ok(())
    }

    /// One step of work. Implementations emit their own events and set
    /// `core.state = Finished` when done.
    async fn step_stream(&mut self, emitter: &EventEmitter) -> Result<()>;

    /// Structured outputs for flow adapters.
    fn behavior_outputs(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// The shared driver loop. Fails fast unless IDLE, runs steps up to the
/// budget, applies the stuck detector after each step, emits the terminal
/// `final` event, and restores the pre-run state (ERROR sticks).
pub async fn run_agent<B: AgentBehavior>(
    behavior: &mut B,
    ctx: ExecutionContext,
    tx: EventSender,
) -> Result<()> {
    if behavior.core().state != ExecutionState::Idle {
        return Err(AgentError::InvalidState {
            state: behavior.core().state,
        });
    }

    behavior.ingest_input(&ctx).await?;

    let emitter = EventEmitter::new(tx);
    let previous_state = behavior.core().state;
    behavior.core_mut().state = ExecutionState::Running;

    let loop_result: Result<()> = async {
        while behavior.core().current_step < behavior.core().max_steps
            && behavior.core().state != ExecutionState::Finished
        {
            behavior.core_mut().current_step += 1;
            let (step, total) = (behavior.core().current_step, behavior.core().max_steps);
            info!(agent = %behavior.core().name, step, total, "executing step");
            emitter
                .emit(ExecutionEvent::step(step, total, format!("step {step}/{total}")))
                .await;

            behavior.step_stream(&emitter).await?;

            if behavior.core().is_stuck() {
                behavior.core_mut().handle_stuck();
            }
        }
        Ok(())
    }
    .await;

    match loop_result {
        Ok(()) => {
            if behavior.core().current_step >= behavior.core().max_steps
                && behavior.core().state != ExecutionState::Finished
            {
                warn!(
                    agent = %behavior.core().name,
                    max_steps = behavior.core().max_steps,
                    "terminated: reached max steps"
                );
            }
            emitter.emit(ExecutionEvent::final_event()).await;
            // The run is over; the agent returns to its pre-run state so a
            // fresh instance reads as IDLE again.
            if behavior.core().state != ExecutionState::Error {
                behavior.core_mut().state = previous_state;
            }
            Ok(())
        }
        Err(e) => {
            behavior.core_mut().state = ExecutionState::Error;
            Err(e)
        }
    }
}

/// Wire an [`AgentBehavior`] type up as a [`Runnable`] through the shared
/// driver. A blanket impl would collide with the flow composites' own
/// `Runnable` impls, so each agent type opts in explicitly.
#[macro_export]
macro_rules! impl_agent_runnable {
    ($agent:ty) => {
        #[async_trait::async_trait]
        impl $crate::Runnable for $agent {
            fn id(&self) -> &str {
                &$crate::AgentBehavior::core(self).id
            }

            fn name(&self) -> &str {
                &$crate::AgentBehavior::core(self).name
            }

            fn state(&self) -> muse_core::types::ExecutionState {
                $crate::AgentBehavior::core(self).state
            }

            async fn run_stream(
                &mut self,
                ctx: $crate::ExecutionContext,
                tx: $crate::EventSender,
            ) -> $crate::Result<()> {
                $crate::run_agent(self, ctx, tx).await
            }

            fn outputs(&self) -> serde_json::Map<String, serde_json::Value> {
                $crate::AgentBehavior::behavior_outputs(self)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{core_with_memory, setup_stores};
    use muse_core::types::Message;

    async fn push(core: &AgentCore, message: Message) {
        core.memory.add_message(message).await.unwrap();
    }

    #[tokio::test]
    async fn stuck_fires_on_triplicate_assistant_content() {
        let (_dir, stores) = setup_stores();
        let core = core_with_memory(&stores, "Lina");
        for _ in 0..3 {
            push(&core, Message::assistant("same reply", "2024-01-15 14:00:00")).await;
        }
        assert!(core.is_stuck());
    }

    #[tokio::test]
    async fn stuck_looks_past_trailing_tool_turns() {
        let (_dir, stores) = setup_stores();
        let core = core_with_memory(&stores, "Lina");
        for _ in 0..3 {
            push(&core, Message::assistant("same reply", "2024-01-15 14:00:00")).await;
            push(
                &core,
                Message::tool("ok", "web_search", "call_1", "2024-01-15 14:00:01"),
            )
            .await;
        }
        assert!(core.is_stuck());
    }

    #[tokio::test]
    async fn distinct_replies_are_not_stuck() {
        let (_dir, stores) = setup_stores();
        let core = core_with_memory(&stores, "Lina");
        for content in ["one", "two", "one"] {
            push(&core, Message::assistant(content, "2024-01-15 14:00:00")).await;
        }
        assert!(!core.is_stuck());
    }
}
