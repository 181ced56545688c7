use serde_json::Map;
use tracing::{info, warn};

use muse_agent::presets;
use muse_agent::{ChatAgent, Runnable};

use crate::node::{FlowNode, FlowSpec};
use crate::sequential::SequentialFlow;

/// Strategy → (route on `decision`) → speak or telegram.
///
/// The strategy agent publishes `{decision, strategy}`; an invalid or missing
/// decision ends the flow after the strategy node.
pub fn character_flow(spec: &FlowSpec) -> SequentialFlow {
    let strategy_spec = spec.clone();
    let strategy = FlowNode::new(
        "strategy",
        Box::new(move |_ctx| {
            Box::new(presets::strategy_agent(
                &strategy_spec.agent_spec(strategy_spec.infer_llm.clone()),
            )) as Box<dyn Runnable>
        }),
    )
    .with_output_adapter(Box::new(|outputs, _ctx| {
        // Empty map when the strategy agent produced no usable decision, so
        // stale context values are never overwritten.
        let decision = outputs
            .get("decision")
            .and_then(|v| v.as_str())
            .filter(|d| !d.is_empty());
        match decision {
            Some(decision) => {
                let mut updates = Map::new();
                updates.insert("decision".to_string(), decision.into());
                updates.insert(
                    "strategy".to_string(),
                    outputs.get("strategy").cloned().unwrap_or_default(),
                );
                updates
            }
            None => {
                warn!("strategy agent produced no valid decision, skipping context update");
                Map::new()
            }
        }
    }))
    .with_next_selector(Box::new(|ctx| {
        let decision = ctx.get_str("decision")?.to_lowercase();
        match decision.as_str() {
            "speakinperson" => {
                info!("routing to speak node");
                Some("speak".to_string())
            }
            "telegram" => {
                info!("routing to telegram node");
                Some("telegram".to_string())
            }
            other => {
                warn!(decision = other, "invalid strategy decision, ending flow");
                None
            }
        }
    }));

    let speak_spec = spec.clone();
    let speak = FlowNode::new(
        "speak",
        Box::new(move |_ctx| {
            Box::new(ChatAgent::speak(
                speak_spec.agent_spec(speak_spec.chat_llm.clone()).core(),
                speak_spec.roleplay_prompt.clone(),
            )) as Box<dyn Runnable>
        }),
    );

    let telegram_spec = spec.clone();
    let telegram = FlowNode::new(
        "telegram",
        Box::new(move |_ctx| {
            Box::new(ChatAgent::telegram(
                telegram_spec.agent_spec(telegram_spec.chat_llm.clone()).core(),
                telegram_spec.roleplay_prompt.clone(),
            )) as Box<dyn Runnable>
        }),
    );

    SequentialFlow::new(spec.name.clone(), vec![strategy, speak, telegram])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::flow_spec;
    use muse_agent::ExecutionContext;
    use serde_json::json;

    #[test]
    fn strategy_selector_routes_on_decision() {
        let (_dir, spec) = flow_spec();
        let flow = character_flow(&spec);
        let selector = flow.nodes[0].next_selector.as_ref().unwrap();

        let telegram = ExecutionContext::new("s1").set("decision", json!("telegram"));
        assert_eq!(selector(&telegram), Some("telegram".to_string()));

        let speak = ExecutionContext::new("s1").set("decision", json!("SpeakInPerson"));
        assert_eq!(selector(&speak), Some("speak".to_string()));

        let unknown = ExecutionContext::new("s1").set("decision", json!("unknown"));
        assert_eq!(selector(&unknown), None);

        let missing = ExecutionContext::new("s1");
        assert_eq!(selector(&missing), None);
    }

    #[test]
    fn strategy_output_adapter_ignores_invalid_output() {
        let (_dir, spec) = flow_spec();
        let flow = character_flow(&spec);
        let adapter = flow.nodes[0].output_adapter.as_ref().unwrap();
        let ctx = ExecutionContext::new("s1");

        let mut outputs = Map::new();
        outputs.insert("decision".to_string(), json!("telegram"));
        outputs.insert("strategy".to_string(), json!("be brief"));
        let updates = adapter(&outputs, &ctx);
        assert_eq!(updates.get("decision"), Some(&json!("telegram")));
        assert_eq!(updates.get("strategy"), Some(&json!("be brief")));

        assert!(adapter(&Map::new(), &ctx).is_empty());
        let mut empty_decision = Map::new();
        empty_decision.insert("decision".to_string(), json!(""));
        assert!(adapter(&empty_decision, &ctx).is_empty());
    }
}
