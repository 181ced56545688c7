use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use muse_core::types::{ExecutionEvent, ExecutionState, Message, MessageCategory, ToolCall};
use muse_llm::ToolChoice;
use muse_tools::{is_inline_tool, ToolCollection, ToolContext, ToolResult, TERMINATE};

use crate::base::{AgentBehavior, AgentCore};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::prompts;
use crate::runnable::EventEmitter;

/// One executed tool call, kept for flow output adapters.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Value,
    pub output: String,
    pub is_error: bool,
}

/// ReAct-style agent: think (LLM + tool schemas) then act (execute tool calls
/// in order). `terminate` finishes the run; inline tools surface their output
/// as user-visible tokens.
pub struct ToolCallAgent {
    core: AgentCore,
    pub tools: ToolCollection,
    pub tool_context: ToolContext,
    pub tool_choice: ToolChoice,
    pub roleplay_prompt: String,
    /// Run-local transcript: what this agent has said and seen this run.
    pub transcript: Vec<Message>,
    /// tool_call_id → executed invocation.
    pub tool_results: HashMap<String, ToolInvocation>,
    /// Name of the tool whose arguments are published as flow outputs.
    pub output_tool: Option<String>,
    pending_calls: Vec<ToolCall>,
}

impl ToolCallAgent {
    pub fn new(
        core: AgentCore,
        tools: ToolCollection,
        roleplay_prompt: impl Into<String>,
    ) -> Self {
        let tool_context = ToolContext {
            memory: core.memory.clone(),
            session_id: core.session_id.clone(),
            character_id: core.character_id.clone(),
            speaker: core.name.clone(),
        };
        Self {
            core,
            tools,
            tool_context,
            tool_choice: ToolChoice::Auto,
            roleplay_prompt: roleplay_prompt.into(),
            transcript: Vec::new(),
            tool_results: HashMap::new(),
            output_tool: None,
            pending_calls: Vec::new(),
        }
    }

    pub fn with_output_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.output_tool = Some(tool_name.into());
        self
    }

    fn system_messages(&self) -> Vec<Message> {
        let now = self.core.current_time();
        let mut msgs = Vec::new();
        if let Some(system_prompt) = &self.core.system_prompt {
            let rendered = prompts::render(system_prompt, &self.roleplay_prompt, "", "");
            msgs.push(Message::system(rendered, now.clone()).with_speaker(&self.core.name));
        } else if !self.roleplay_prompt.is_empty() {
            msgs.push(
                Message::system(self.roleplay_prompt.clone(), now.clone())
                    .with_speaker(&self.core.name),
            );
        }
        msgs
    }

    /// One LLM round with tool schemas. Stores the assistant turn in memory
    /// and the transcript; returns true when there are tool calls to act on.
    async fn think(&mut self) -> Result<bool> {
        let system = self.system_messages();
        let mut conversation = self.transcript.clone();
        if let Some(next_step) = self.core.next_step_prompt.take() {
            conversation.push(Message::user(next_step, self.core.current_time()));
        }

        let response = self
            .core
            .llm
            .ask_tool(
                &conversation,
                Some(&system),
                &self.tools.to_schemas(),
                self.tool_choice,
                false,
                None,
            )
            .await?;

        let now = self.core.current_time();
        let assistant = if response.tool_calls.is_empty() {
            Message::assistant(response.content.clone().unwrap_or_default(), now)
                .with_speaker(&self.core.name)
                .with_visibility(self.core.visible_for_characters.clone())
        } else {
            let mut msg = Message::from_tool_calls(
                response.tool_calls.clone(),
                response.content.clone(),
                now,
            );
            msg.speaker = Some(self.core.name.clone());
            msg.visible_for_characters = self.core.visible_for_characters.clone();
            msg
        };
        self.core.memory.add_message(assistant.clone()).await?;
        self.transcript.push(assistant);

        self.pending_calls = response.tool_calls;
        if self.pending_calls.is_empty() {
            // Nothing to act on; the turn is over.
            self.core.result = response.content.unwrap_or_default();
            self.core.state = ExecutionState::Finished;
            return Ok(false);
        }
        Ok(true)
    }

    /// Execute pending tool calls in order, persisting a tool message per
    /// call. Inline tools also stream their content as token events.
    async fn act(&mut self, emitter: &EventEmitter) -> Result<()> {
        let calls = std::mem::take(&mut self.pending_calls);
        for call in calls {
            let name = call.function.name.clone();
            emitter
                .emit(ExecutionEvent::tool_status(format!("🔧 running {name}")))
                .await;

            let args: Value = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| Value::Object(Map::new()));
            let result = match self.tools.get(&name) {
                Some(tool) => tool.execute(args.clone(), &self.tool_context).await,
                None => ToolResult::error(format!("unknown tool: {name}")),
            };
            if result.is_error {
                warn!(tool = %name, output = %result.content, "tool returned an error");
            }

            self.tool_results.insert(
                call.id.clone(),
                ToolInvocation {
                    name: name.clone(),
                    args,
                    output: result.content.clone(),
                    is_error: result.is_error,
                },
            );

            let inline = is_inline_tool(&name);
            let category = if !inline || result.is_error {
                MessageCategory::Normal
            } else if name == muse_tools::SPEAK_IN_PERSON {
                MessageCategory::SpeakInPerson
            } else {
                MessageCategory::Telegram
            };
            let mut tool_message = Message::tool(
                result.content.clone(),
                name.clone(),
                call.id.clone(),
                self.core.current_time(),
            )
            .with_category(category)
            .with_visibility(self.core.visible_for_characters.clone());
            if inline && !result.is_error {
                // Inline output is the character speaking; it counts as a
                // dialogue turn for this speaker.
                tool_message.speaker = Some(self.core.name.clone());
            }
            self.core.memory.add_message(tool_message.clone()).await?;
            self.transcript.push(tool_message);

            if inline && !result.is_error {
                let event = ExecutionEvent::token(result.content.clone())
                    .with_message_type(name.clone())
                    .with_message_id(call.id.clone());
                emitter.emit(event).await;
                self.core.result = result.content.clone();
            } else {
                let event = ExecutionEvent::tool_output(result.content.clone(), name.clone())
                    .with_message_id(call.id.clone());
                emitter.emit(event).await;
            }

            if name == TERMINATE {
                info!(agent = %self.core.name, "terminate tool invoked, finishing");
                self.core.state = ExecutionState::Finished;
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AgentBehavior for ToolCallAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    async fn ingest_input(&mut self, ctx: &ExecutionContext) -> Result<()> {
        if let Some(input) = ctx.user_input.as_deref().filter(|s| !s.trim().is_empty()) {
            let category = ctx
                .input_mode()
                .map(|m| m.category())
                .unwrap_or(MessageCategory::Normal);
            let message = Message::user(input, self.core.current_time())
                .with_category(category)
                .with_visibility(ctx.visible_for_characters.clone());
            self.core.memory.add_message(message.clone()).await?;
            self.transcript.push(message);
        } else {
            // No fresh input: seed the transcript with the recent window so
            // background agents still see the conversation.
            self.transcript = self.core.memory.recent_messages();
            if self.transcript.is_empty() {
                let now = self.core.current_time();
                let (window, _) = self.core.memory.get_messages_around_time(
                    &now,
                    24.0,
                    50,
                    Some(&[
                        MessageCategory::Telegram.as_i64(),
                        MessageCategory::SpeakInPerson.as_i64(),
                        MessageCategory::Thought.as_i64(),
                    ]),
                    self.core.character_id.as_deref(),
                )?;
                self.transcript = window
                    .into_iter()
                    .map(|msg| {
                        // Collapse history rows to plain text; the validator
                        // would drop bare tool rows anyway.
                        let when = msg.created_at.clone().unwrap_or_default();
                        let who = msg.speaker.clone().unwrap_or_default();
                        let what = msg.content.clone().unwrap_or_default();
                        Message::user(format!("{when} - {who}: {what}"), when)
                    })
                    .collect();
            }
        }
        Ok(())
    }

    async fn step_stream(&mut self, emitter: &EventEmitter) -> Result<()> {
        emitter
            .emit(ExecutionEvent::tool_status("🧠 thinking..."))
            .await;
        let should_act = self.think().await?;
        if should_act {
            self.act(emitter).await?;
        }
        Ok(())
    }

    /// Publish the configured output tool's arguments (e.g. the strategy
    /// decision) onto the flow context. An empty map means "no valid output".
    fn behavior_outputs(&self) -> Map<String, Value> {
        let mut outputs = Map::new();
        let Some(output_tool) = &self.output_tool else {
            return outputs;
        };
        for invocation in self.tool_results.values() {
            if &invocation.name == output_tool && !invocation.is_error {
                if let Some(obj) = invocation.args.as_object() {
                    for (key, value) in obj {
                        outputs.insert(key.clone(), value.clone());
                    }
                    break;
                }
            }
        }
        outputs
    }
}

crate::impl_agent_runnable!(ToolCallAgent);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{core_with_memory, setup_stores};
    use muse_core::types::FunctionCall;
    use std::sync::Arc;

    fn strategy_agent(stores: &Arc<muse_memory::Stores>) -> ToolCallAgent {
        let core = core_with_memory(stores, "Lina");
        ToolCallAgent::new(
            core,
            ToolCollection::new(vec![
                Arc::new(muse_tools::Strategy) as Arc<dyn muse_tools::Tool>,
                Arc::new(muse_tools::Terminate) as Arc<dyn muse_tools::Tool>,
            ]),
            "rp",
        )
        .with_output_tool(muse_tools::STRATEGY)
    }

    #[tokio::test]
    async fn act_records_invocations_and_outputs() {
        let (_dir, stores) = setup_stores();
        let mut agent = strategy_agent(&stores);
        agent.pending_calls = vec![ToolCall {
            id: "call_0".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: muse_tools::STRATEGY.to_string(),
                arguments: r#"{"decision":"telegram","strategy":"be brief"}"#.to_string(),
            },
        }];

        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let emitter = EventEmitter::new(tx);
        agent.act(&emitter).await.unwrap();

        // tool_status then tool_output.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, muse_core::types::EventKind::ToolStatus);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, muse_core::types::EventKind::ToolOutput);

        let outputs = agent.behavior_outputs();
        assert_eq!(outputs.get("decision").and_then(|v| v.as_str()), Some("telegram"));
        assert_eq!(outputs.get("strategy").and_then(|v| v.as_str()), Some("be brief"));
    }

    #[tokio::test]
    async fn terminate_finishes_and_skips_rest() {
        let (_dir, stores) = setup_stores();
        let mut agent = strategy_agent(&stores);
        agent.pending_calls = vec![
            ToolCall {
                id: "call_0".to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: TERMINATE.to_string(),
                    arguments: "{}".to_string(),
                },
            },
            ToolCall {
                id: "call_1".to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: muse_tools::STRATEGY.to_string(),
                    arguments: r#"{"decision":"telegram","strategy":"x"}"#.to_string(),
                },
            },
        ];

        let (tx, mut _rx) = tokio::sync::mpsc::channel(64);
        let emitter = EventEmitter::new(tx);
        agent.act(&emitter).await.unwrap();

        assert_eq!(agent.core.state, ExecutionState::Finished);
        assert!(agent.tool_results.contains_key("call_0"));
        assert!(!agent.tool_results.contains_key("call_1"));
    }

    #[tokio::test]
    async fn inline_tool_emits_token_and_dialogue_message() {
        let (_dir, stores) = setup_stores();
        let core = core_with_memory(&stores, "Lina");
        let memory = core.memory.clone();
        let mut agent = ToolCallAgent::new(
            core,
            ToolCollection::new(vec![
                Arc::new(muse_tools::SpeakInPerson) as Arc<dyn muse_tools::Tool>,
            ]),
            "rp",
        );
        agent.pending_calls = vec![ToolCall {
            id: "call_0".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: muse_tools::SPEAK_IN_PERSON.to_string(),
                arguments: r#"{"message":"你好"}"#.to_string(),
            },
        }];

        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let emitter = EventEmitter::new(tx);
        agent.act(&emitter).await.unwrap();

        let _status = rx.recv().await.unwrap();
        let token = rx.recv().await.unwrap();
        assert_eq!(token.kind, muse_core::types::EventKind::Token);
        assert_eq!(token.message_type.as_deref(), Some(muse_tools::SPEAK_IN_PERSON));
        assert_eq!(token.content.as_deref(), Some("你好"));

        // The spoken line counts as a dialogue turn for this speaker.
        assert_eq!(memory.count_dialogue_messages("Lina", None).unwrap(), 1);
    }
}
