use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info};

use muse_core::types::{ExecutionEvent, ExecutionState, Message, MessageCategory, Role};
use muse_llm::DeltaEvent;
use muse_tools::{SEND_TELEGRAM_MESSAGE, SPEAK_IN_PERSON};

use crate::base::{short_id, AgentBehavior, AgentCore};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::prompts;
use crate::runnable::EventEmitter;

/// Which modality this chat agent speaks through. The mode decides the system
/// prompt, the persisted category, and how the history window is reshaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Plain,
    Speak,
    Telegram,
}

/// Single-step streaming agent with no tool calls: one LLM call, tokens out,
/// one assistant message persisted.
pub struct ChatAgent {
    core: AgentCore,
    pub mode: ChatMode,
    pub roleplay_prompt: String,
    /// Strategy text handed over by the flow; steers the reply silently.
    pub inner_thought: String,
}

impl ChatAgent {
    fn new(mut core: AgentCore, mode: ChatMode, roleplay_prompt: impl Into<String>) -> Self {
        core.max_steps = 1;
        Self {
            core,
            mode,
            roleplay_prompt: roleplay_prompt.into(),
            inner_thought: String::new(),
        }
    }

    pub fn plain(core: AgentCore, roleplay_prompt: impl Into<String>) -> Self {
        Self::new(core, ChatMode::Plain, roleplay_prompt)
    }

    pub fn speak(core: AgentCore, roleplay_prompt: impl Into<String>) -> Self {
        Self::new(core, ChatMode::Speak, roleplay_prompt)
    }

    pub fn telegram(core: AgentCore, roleplay_prompt: impl Into<String>) -> Self {
        Self::new(core, ChatMode::Telegram, roleplay_prompt)
    }

    /// Event routing tag for this modality.
    pub fn message_type(&self) -> &'static str {
        match self.mode {
            ChatMode::Plain => "chat",
            ChatMode::Speak => SPEAK_IN_PERSON,
            ChatMode::Telegram => SEND_TELEGRAM_MESSAGE,
        }
    }

    /// Category stamped on the persisted reply.
    pub fn category(&self) -> MessageCategory {
        match self.mode {
            ChatMode::Plain => MessageCategory::Normal,
            ChatMode::Speak => MessageCategory::SpeakInPerson,
            ChatMode::Telegram => MessageCategory::Telegram,
        }
    }

    fn system_messages(&self) -> Vec<Message> {
        let now = self.core.current_time();
        match self.mode {
            ChatMode::Plain => {
                let mut msgs = Vec::new();
                if !self.roleplay_prompt.is_empty() {
                    msgs.push(
                        Message::system(self.roleplay_prompt.clone(), now.clone())
                            .with_speaker(&self.core.name),
                    );
                }
                msgs.push(
                    Message::system(prompts::CHAT_SYSTEM_PROMPT, now).with_speaker(&self.core.name),
                );
                msgs
            }
            ChatMode::Speak | ChatMode::Telegram => {
                let (overview, relations) = self.memory_overview();
                let template = if self.mode == ChatMode::Speak {
                    prompts::SPEAK_SYSTEM_PROMPT
                } else {
                    prompts::TELEGRAM_SYSTEM_PROMPT
                };
                let rendered =
                    prompts::render(template, &self.roleplay_prompt, &overview, &relations);
                vec![Message::system(rendered, now).with_speaker(&self.core.name)]
            }
        }
    }

    /// One line per schedule entry and scenario, sorted by start time, plus
    /// the relationship records.
    fn memory_overview(&self) -> (String, String) {
        let mut items: Vec<(String, String, String)> = Vec::new();
        if let Ok(entries) = self.core.memory.get_schedule_entries() {
            for entry in entries {
                items.push((
                    entry.start_at.clone(),
                    entry.end_at.clone(),
                    format!("{}(ID:{})", entry.content, entry.entry_id),
                ));
            }
        }
        if let Ok(scenarios) = self.core.memory.list_scenarios() {
            for sc in scenarios {
                let label = if sc.title.is_empty() { sc.content.clone() } else { sc.title.clone() };
                items.push((
                    sc.start_at.clone(),
                    sc.end_at.clone(),
                    format!("{}(ID:{})", label, sc.scenario_id.as_deref().unwrap_or("?")),
                ));
            }
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));
        let overview = if items.is_empty() {
            "No schedule or scenario records found.".to_string()
        } else {
            let lines: Vec<String> = items
                .iter()
                .map(|(start, end, text)| format!("[{start} ~ {end}] {text}"))
                .collect();
            format!(
                "Schedule and scenario overview sorted by start time:\n{}",
                lines.join("\n")
            )
        };

        let relations = match self.core.memory.list_relations() {
            Ok(relations) if !relations.is_empty() => {
                let lines: Vec<String> = relations
                    .iter()
                    .map(|rel| {
                        format!(
                            "------\nrelation_id: {}\nname: {}\nknowledge: {}\nprogress: {}",
                            rel.relation_id, rel.name, rel.knowledge, rel.progress
                        )
                    })
                    .collect();
                format!("Currently recorded relationships:\n{}", lines.join("\n"))
            }
            _ => "No relationship records found.".to_string(),
        };

        (overview, relations)
    }

    /// Reshape the persisted window into the dialogue transcript: other
    /// speakers' dialogue rows become timestamped user lines, own rows stay
    /// assistant, SYSTEM_INSTRUCTION rows gain the obey-strictly suffix.
    fn format_dialogue_window(&self, messages: Vec<Message>) -> Vec<Message> {
        let dialogue = [
            MessageCategory::Telegram,
            MessageCategory::SpeakInPerson,
            MessageCategory::Thought,
        ];
        let mut formatted = Vec::new();
        for msg in messages {
            let indicator = msg.category.indicator();
            let when = msg.created_at.clone().unwrap_or_default();
            match msg.role {
                Role::Assistant | Role::Tool => {
                    if !dialogue.contains(&msg.category) {
                        continue;
                    }
                    let content = msg.content.clone().unwrap_or_default();
                    if msg.speaker.as_deref() != Some(self.core.name.as_str()) {
                        let speaker = msg.speaker.clone().unwrap_or_default();
                        formatted.push(
                            Message::user(
                                format!("{when} - {indicator} - {speaker}: {content}"),
                                when.clone(),
                            )
                            .with_category(msg.category),
                        );
                    } else {
                        formatted.push(
                            Message::assistant(content, when.clone())
                                .with_speaker(&self.core.name)
                                .with_category(msg.category),
                        );
                    }
                }
                Role::User => {
                    let content = msg.content.clone().unwrap_or_default();
                    let text = if dialogue.contains(&msg.category) {
                        format!("{when} - {indicator}: {content}")
                    } else if msg.category == MessageCategory::SystemInstruction {
                        format!(
                            "{when} - SYSTEM_INSTRUCTION:\n {content}\nSYSTEM_INSTRUCTION must be followed strictly."
                        )
                    } else {
                        content
                    };
                    formatted.push(Message::user(text, when.clone()).with_category(msg.category));
                }
                Role::System => formatted.push(msg),
            }
        }
        formatted
    }

    fn conversation_messages(&self) -> Result<Vec<Message>> {
        let now = self.core.current_time();
        match self.mode {
            ChatMode::Plain => Ok(self.core.memory.recent_messages()),
            ChatMode::Speak | ChatMode::Telegram => {
                let (window, _) = self.core.memory.get_messages_around_time(
                    &now,
                    1.0,
                    100,
                    None,
                    self.core.character_id.as_deref(),
                )?;
                let mut messages = self.format_dialogue_window(window);
                let aid = format!(
                    "**current time**: {now}\n**Your Current Inner Thought:** [{}] Perform as your thought but never print it out.\n{}",
                    if self.inner_thought.is_empty() { "None" } else { &self.inner_thought },
                    prompts::DIALOGUE_HELPER_PROMPT,
                );
                messages.push(Message::system(aid, now).with_speaker(&self.core.name));
                Ok(messages)
            }
        }
    }
}

#[async_trait]
impl AgentBehavior for ChatAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    async fn ingest_input(&mut self, ctx: &ExecutionContext) -> Result<()> {
        if let Some(strategy) = ctx.get_str("strategy") {
            self.inner_thought = strategy.to_string();
        }
        match self.mode {
            // The dialogue agents run after the user-intake node; the input is
            // already persisted.
            ChatMode::Speak | ChatMode::Telegram => Ok(()),
            ChatMode::Plain => {
                let Some(input) = ctx.user_input.as_deref().filter(|s| !s.trim().is_empty())
                else {
                    return Ok(());
                };
                let message = Message::user(input, self.core.current_time())
                    .with_visibility(ctx.visible_for_characters.clone());
                self.core.memory.add_message(message).await?;
                Ok(())
            }
        }
    }

    async fn step_stream(&mut self, emitter: &EventEmitter) -> Result<()> {
        let mut all_messages = self.system_messages();
        all_messages.extend(self.conversation_messages()?);

        let message_id = format!("call_{}", short_id());
        let message_type = self.message_type().to_string();
        let (delta_tx, mut delta_rx) = mpsc::channel::<DeltaEvent>(64);

        let llm = self.core.llm.clone();
        let llm_task = tokio::spawn(async move {
            llm.ask(&all_messages, true, Some(delta_tx)).await
        });

        let mut collected = String::new();
        while let Some(delta) = delta_rx.recv().await {
            match delta {
                DeltaEvent::Token(text) => {
                    collected.push_str(&text);
                    let event = ExecutionEvent::token(text)
                        .with_message_type(message_type.clone())
                        .with_message_id(message_id.clone());
                    emitter.emit(event).await;
                }
                DeltaEvent::StreamEnd => break,
                DeltaEvent::ToolCallDelta { .. } => {}
            }
        }

        let llm_result = llm_task.await.expect("llm task not cancelled");
        let (full_response, llm_error) = match llm_result {
            Ok(full) => (full, None),
            Err(e) => {
                error!(agent = %self.core.name, error = %e, "LLM call failed");
                (collected, Some(e))
            }
        };

        if full_response.trim().is_empty() {
            let message = match llm_error {
                Some(e) => format!("LLM call failed: {e}"),
                None => "no valid response received".to_string(),
            };
            self.core.state = ExecutionState::Error;
            let event = ExecutionEvent::error(message).with_message_type(message_type);
            emitter.emit(event).await;
            return Ok(());
        }

        info!(agent = %self.core.name, chars = full_response.len(), "chat response complete");
        let reply = Message::assistant(full_response.clone(), self.core.current_time())
            .with_speaker(&self.core.name)
            .with_category(self.category())
            .with_visibility(self.core.visible_for_characters.clone());
        self.core.memory.add_message(reply).await?;
        self.core.result = full_response;
        self.core.state = ExecutionState::Finished;
        Ok(())
    }
}

crate::impl_agent_runnable!(ChatAgent);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{core_with_memory, setup_stores};

    #[test]
    fn modality_tags_and_categories() {
        let (_dir, stores) = setup_stores();
        let speak = ChatAgent::speak(core_with_memory(&stores, "Lina"), "rp");
        assert_eq!(speak.message_type(), SPEAK_IN_PERSON);
        assert_eq!(speak.category(), MessageCategory::SpeakInPerson);

        let telegram = ChatAgent::telegram(core_with_memory(&stores, "Lina"), "rp");
        assert_eq!(telegram.message_type(), SEND_TELEGRAM_MESSAGE);
        assert_eq!(telegram.category(), MessageCategory::Telegram);
    }

    #[test]
    fn dialogue_window_reshapes_other_speakers() {
        let (_dir, stores) = setup_stores();
        let agent = ChatAgent::telegram(core_with_memory(&stores, "Lina"), "rp");
        let window = vec![
            Message::assistant("hi from Lina", "2024-01-15 14:00:00")
                .with_speaker("Lina")
                .with_category(MessageCategory::Telegram),
            Message::assistant("hi from Rex", "2024-01-15 14:01:00")
                .with_speaker("Rex")
                .with_category(MessageCategory::Telegram),
            Message::assistant("internal", "2024-01-15 14:02:00")
                .with_speaker("Lina")
                .with_category(MessageCategory::Normal),
            Message::user("obey", "2024-01-15 14:03:00")
                .with_category(MessageCategory::SystemInstruction),
        ];
        let formatted = agent.format_dialogue_window(window);
        // NORMAL-category assistant row is dropped.
        assert_eq!(formatted.len(), 3);
        assert_eq!(formatted[0].role, Role::Assistant);
        assert_eq!(formatted[1].role, Role::User);
        assert!(formatted[1].content.as_deref().unwrap().contains("Rex"));
        assert!(formatted[2]
            .content
            .as_deref()
            .unwrap()
            .contains("must be followed strictly"));
    }
}
