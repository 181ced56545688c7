use muse_agent::presets;
use muse_agent::Runnable;

use crate::node::{FlowNode, FlowSpec};
use crate::sequential::SequentialFlow;

/// Single-node flow: the plain tool-calling character. The user's input goes
/// straight to the agent, which speaks through its inline tools.
pub fn sera_flow(spec: &FlowSpec) -> SequentialFlow {
    let character_spec = spec.clone();
    let character = FlowNode::new(
        "character",
        Box::new(move |_ctx| {
            Box::new(presets::character_agent(
                &character_spec.agent_spec(character_spec.chat_llm.clone()),
            )) as Box<dyn Runnable>
        }),
    );

    SequentialFlow::new(format!("{}-sera", spec.name), vec![character])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::flow_spec;

    #[test]
    fn sera_is_a_single_terminal_node() {
        let (_dir, spec) = flow_spec();
        let flow = sera_flow(&spec);
        assert_eq!(flow.nodes.len(), 1);
        assert!(flow.nodes[0].next_selector.is_none());
    }
}
