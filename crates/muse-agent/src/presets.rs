//! Named agent configurations: tool subsets plus prompts.

use std::sync::Arc;

use muse_llm::{LlmClient, ToolChoice};
use muse_memory::{Memory, Stores};
use muse_tools::{
    DialogueHistory, Reflection, RelationTool, ScenarioReader, ScenarioWriter, ScheduleReader,
    ScheduleWriter, SendTelegramMessage, SpeakInPerson, Strategy, Terminate, Tool, ToolCollection,
    WebSearch, STRATEGY,
};

use crate::base::AgentCore;
use crate::prompts;
use crate::toolcall::ToolCallAgent;

pub struct AgentSpec {
    pub stores: Arc<Stores>,
    pub session_id: String,
    pub name: String,
    pub roleplay_prompt: String,
    pub character_id: Option<String>,
    pub visible_for_characters: Option<Vec<String>>,
    pub llm: Arc<LlmClient>,
}

impl AgentSpec {
    pub fn core(&self) -> AgentCore {
        let memory = Arc::new(
            Memory::new(self.stores.clone(), self.session_id.clone())
                .with_character(self.character_id.clone()),
        );
        let mut core = AgentCore::new(
            self.name.clone(),
            self.session_id.clone(),
            memory,
            self.llm.clone(),
        );
        core.character_id = self.character_id.clone();
        core.visible_for_characters = self.visible_for_characters.clone();
        core
    }
}

fn memory_tools(_spec: &AgentSpec) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(DialogueHistory),
        Arc::new(ScheduleReader),
        Arc::new(ScheduleWriter),
        Arc::new(ScenarioReader),
        Arc::new(ScenarioWriter),
        Arc::new(RelationTool),
        Arc::new(Reflection),
    ]
}

/// Strategy agent: plans the turn, decides the channel, publishes
/// `{decision, strategy}` through its output tool.
pub fn strategy_agent(spec: &AgentSpec) -> ToolCallAgent {
    let mut tools: Vec<Arc<dyn Tool>> = vec![Arc::new(Strategy), Arc::new(WebSearch::new())];
    tools.extend(memory_tools(spec));
    tools.push(Arc::new(Terminate));

    let mut core = spec.core();
    core.system_prompt = Some(prompts::STRATEGY_SYSTEM_PROMPT.to_string());
    ToolCallAgent::new(core, ToolCollection::new(tools), spec.roleplay_prompt.clone())
        .with_output_tool(STRATEGY)
}

/// Writer agent: silent background bookkeeping. No speaking tools, so it
/// never emits user-visible tokens.
pub fn writer_agent(spec: &AgentSpec) -> ToolCallAgent {
    let mut tools: Vec<Arc<dyn Tool>> = vec![Arc::new(WebSearch::new())];
    tools.extend(memory_tools(spec));
    tools.push(Arc::new(Terminate));

    let mut core = spec.core();
    core.system_prompt = Some(prompts::WRITER_SYSTEM_PROMPT.to_string());
    ToolCallAgent::new(core, ToolCollection::new(tools), spec.roleplay_prompt.clone())
}

/// Plain tool-calling character: speaks through the inline tools directly.
pub fn character_agent(spec: &AgentSpec) -> ToolCallAgent {
    let mut tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(SpeakInPerson),
        Arc::new(SendTelegramMessage),
        Arc::new(WebSearch::new()),
    ];
    tools.extend(memory_tools(spec));
    tools.push(Arc::new(Terminate));

    let mut core = spec.core();
    core.system_prompt = Some(prompts::CHARACTER_SYSTEM_PROMPT.to_string());
    let mut agent =
        ToolCallAgent::new(core, ToolCollection::new(tools), spec.roleplay_prompt.clone());
    agent.tool_choice = ToolChoice::Auto;
    agent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{setup_stores, test_llm};

    fn spec(stores: &Arc<Stores>) -> AgentSpec {
        AgentSpec {
            stores: stores.clone(),
            session_id: "s1".to_string(),
            name: "Lina".to_string(),
            roleplay_prompt: "rp".to_string(),
            character_id: Some("char-a".to_string()),
            visible_for_characters: Some(vec!["char-a".to_string()]),
            llm: test_llm(),
        }
    }

    #[test]
    fn strategy_subset_has_no_speaking_tools() {
        let (_dir, stores) = setup_stores();
        let agent = strategy_agent(&spec(&stores));
        let names = agent.tools.names();
        assert!(names.contains(&muse_tools::STRATEGY));
        assert!(names.contains(&muse_tools::TERMINATE));
        assert!(!names.contains(&muse_tools::SPEAK_IN_PERSON));
        assert!(!names.contains(&muse_tools::SEND_TELEGRAM_MESSAGE));
        assert_eq!(agent.output_tool.as_deref(), Some(muse_tools::STRATEGY));
    }

    #[test]
    fn writer_is_silent() {
        let (_dir, stores) = setup_stores();
        let agent = writer_agent(&spec(&stores));
        let names = agent.tools.names();
        assert!(!names.contains(&muse_tools::SPEAK_IN_PERSON));
        assert!(!names.contains(&muse_tools::SEND_TELEGRAM_MESSAGE));
        assert!(!names.contains(&muse_tools::STRATEGY));
    }

    #[test]
    fn character_can_speak_both_ways() {
        let (_dir, stores) = setup_stores();
        let agent = character_agent(&spec(&stores));
        let names = agent.tools.names();
        assert!(names.contains(&muse_tools::SPEAK_IN_PERSON));
        assert!(names.contains(&muse_tools::SEND_TELEGRAM_MESSAGE));
    }
}
