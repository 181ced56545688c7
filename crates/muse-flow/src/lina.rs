use std::sync::Arc;

use tracing::info;

use muse_agent::presets;
use muse_agent::{Runnable, UserAgent};
use muse_memory::Memory;

use crate::character::character_flow;
use crate::node::{FlowNode, FlowSpec};
use crate::parallel::ParallelFlow;
use crate::sequential::SequentialFlow;

/// Every Nth completed dialogue turn wakes the background writer.
const WRITER_CADENCE: i64 = 5;

/// User intake → parallel(background writer, character flow).
///
/// COMMAND input skips the parallel stage entirely. The writer branch only
/// joins every [`WRITER_CADENCE`]th dialogue turn; otherwise the character
/// flow runs alone.
pub fn lina_flow(spec: &FlowSpec) -> SequentialFlow {
    let user_spec = spec.clone();
    let user = FlowNode::new(
        "user",
        Box::new(move |_ctx| {
            let mut core = user_spec.agent_spec(user_spec.infer_llm.clone()).core();
            core.name = "user".to_string();
            Box::new(UserAgent::new(core)) as Box<dyn Runnable>
        }),
    )
    .with_name("user_input")
    .with_output_adapter(Box::new(|outputs, _ctx| outputs.clone()))
    .with_next_selector(Box::new(|ctx| {
        if ctx.get_bool("skip_next_node") {
            info!("COMMAND input, skipping parallel execution");
            None
        } else {
            Some("parallel".to_string())
        }
    }));

    let parallel_spec = spec.clone();
    let parallel = FlowNode::new(
        "parallel",
        Box::new(move |_ctx| {
            let memory = Memory::new(
                parallel_spec.stores.clone(),
                parallel_spec.session_id.clone(),
            );
            let dialogue_count = memory
                .count_dialogue_messages(&parallel_spec.name, None)
                .unwrap_or(0);
            let run_writer = dialogue_count > 0 && dialogue_count % WRITER_CADENCE == 0;
            info!(dialogue_count, run_writer, "selecting parallel topology");

            if run_writer {
                Box::new(inner_parallel(&parallel_spec)) as Box<dyn Runnable>
            } else {
                Box::new(character_flow(&parallel_spec)) as Box<dyn Runnable>
            }
        }),
    )
    .with_name("parallel_execution")
    // User input is already persisted by the intake node.
    .with_input_adapter(Box::new(|ctx| ctx.clear_user_input()));

    SequentialFlow::new(format!("{}-lina", spec.name), vec![user, parallel])
}

/// Writer in the background, character flow in the response stream.
fn inner_parallel(spec: &FlowSpec) -> ParallelFlow {
    let writer_spec = spec.clone();
    let writer = FlowNode::new(
        "background_writer",
        Box::new(move |_ctx| {
            Box::new(presets::writer_agent(
                &writer_spec.agent_spec(writer_spec.infer_llm.clone()),
            )) as Box<dyn Runnable>
        }),
    )
    .background();

    let character_spec = spec.clone();
    let character = FlowNode::new(
        "character_flow",
        Box::new(move |_ctx| Box::new(character_flow(&character_spec)) as Box<dyn Runnable>),
    );

    ParallelFlow::new(format!("{}-parallel", spec.name), vec![writer, character])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::flow_spec;
    use muse_agent::ExecutionContext;
    use serde_json::json;

    #[test]
    fn command_input_skips_parallel_stage() {
        let (_dir, spec) = flow_spec();
        let flow = lina_flow(&spec);
        let selector = flow.nodes[0].next_selector.as_ref().unwrap();

        let normal = ExecutionContext::new("s1").set("skip_next_node", json!(false));
        assert_eq!(selector(&normal), Some("parallel".to_string()));

        let command = ExecutionContext::new("s1").set("skip_next_node", json!(true));
        assert_eq!(selector(&command), None);
    }

    #[test]
    fn parallel_node_is_terminal() {
        let (_dir, spec) = flow_spec();
        let flow = lina_flow(&spec);
        assert!(flow.nodes[1].next_selector.is_none());
        assert_eq!(flow.nodes[1].id, "parallel");
    }
}
