use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use muse_agent::{
    AgentError, EventSender, ExecutionContext, Result, Runnable, EVENT_CHANNEL_CAPACITY,
};
use muse_core::types::{EventKind, ExecutionEvent, ExecutionState};

use crate::node::FlowNode;

/// Executes nodes one at a time with conditional routing. A node without a
/// selector is terminal; revisiting a node id terminates the flow; a node
/// failure emits one error event and stops the flow.
pub struct SequentialFlow {
    pub id: String,
    pub name: String,
    pub state: ExecutionState,
    pub nodes: Vec<Arc<FlowNode>>,
    /// Final flow context after the run, for callers that inspect routing.
    pub context: Option<ExecutionContext>,
    outputs: Map<String, Value>,
}

impl SequentialFlow {
    pub fn new(name: impl Into<String>, nodes: Vec<FlowNode>) -> Self {
        let name = name.into();
        Self {
            id: format!("flow-{}-{}", name, short_id()),
            name,
            state: ExecutionState::Idle,
            nodes: nodes.into_iter().map(Arc::new).collect(),
            context: None,
            outputs: Map::new(),
        }
    }
}

#[async_trait]
impl Runnable for SequentialFlow {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ExecutionState {
        self.state
    }

    async fn run_stream(&mut self, ctx: ExecutionContext, tx: EventSender) -> Result<()> {
        if self.state != ExecutionState::Idle {
            return Err(AgentError::InvalidState { state: self.state });
        }
        self.state = ExecutionState::Running;

        let node_map: HashMap<String, Arc<FlowNode>> = self
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut context = ctx;
        let mut current = self.nodes.first().map(|n| n.id.clone());
        let mut step_count = 0u32;

        info!(flow = %self.name, nodes = self.nodes.len(), "starting sequential execution");

        while let Some(node_id) = current.take() {
            let Some(node) = node_map.get(&node_id) else {
                warn!(flow = %self.name, node_id, "selector chose unknown node, ending flow");
                break;
            };
            if !visited.insert(node_id.clone()) {
                warn!(flow = %self.name, node_id, "node already executed, stopping to avoid loop");
                break;
            }
            step_count += 1;

            let header = ExecutionEvent::flow_step(step_count, format!("node {step_count}: {}", node.name))
                .with_path_prefix(&self.id);
            let _ = tx.send(header).await;

            let (outputs, node_result) =
                execute_node(node.clone(), &context, &self.id, tx.clone()).await;

            match node_result {
                Ok(()) => {}
                Err(e) => {
                    let event = ExecutionEvent::error(format!(
                        "Node {} execution failed: {e}",
                        node.name
                    ))
                    .with_path_prefix(&node.id)
                    .with_path_prefix(&self.id);
                    let _ = tx.send(event).await;
                    self.state = ExecutionState::Error;
                    let _ = tx.send(ExecutionEvent::final_event().with_path_prefix(&self.id)).await;
                    self.context = Some(context);
                    return Err(e);
                }
            }

            if let Some(adapter) = &node.output_adapter {
                let updates = adapter(&outputs, &context);
                if !updates.is_empty() {
                    info!(
                        flow = %self.name,
                        node = %node.id,
                        keys = ?updates.keys().collect::<Vec<_>>(),
                        "output adapter updated context"
                    );
                    context = context.merge(updates);
                } else {
                    info!(flow = %self.name, node = %node.id, "output adapter returned no update");
                }
            }

            if context.stop_response_requested && node.can_stop_response {
                info!(flow = %self.name, node = %node.id, "response stop requested, ending flow");
                break;
            }

            current = match &node.next_selector {
                Some(selector) => {
                    let next = selector(&context);
                    match &next {
                        Some(next_id) => info!(flow = %self.name, next_id, "routing to next node"),
                        None => info!(flow = %self.name, "selector ended flow"),
                    }
                    next
                }
                None => {
                    info!(flow = %self.name, node = %node.id, "terminal node reached");
                    None
                }
            };
        }

        info!(flow = %self.name, steps = step_count, "sequential execution completed");
        let _ = tx
            .send(ExecutionEvent::final_event().with_path_prefix(&self.id))
            .await;
        self.outputs = context.data.clone();
        self.context = Some(context);
        self.state = ExecutionState::Finished;
        Ok(())
    }

    fn outputs(&self) -> Map<String, Value> {
        self.outputs.clone()
    }
}

/// Run one node: build its runnable, forward its events (stripping the nested
/// `final`, prefixing the execution path), and return the published outputs.
pub(crate) async fn execute_node(
    node: Arc<FlowNode>,
    context: &ExecutionContext,
    flow_id: &str,
    tx: EventSender,
) -> (Map<String, Value>, Result<()>) {
    let node_ctx = match &node.input_adapter {
        Some(adapter) => adapter(context),
        None => context.clone(),
    };

    let mut runnable = (node.runnable_factory)(&node_ctx);
    let (ntx, mut nrx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let result = runnable.run_stream(node_ctx, ntx).await;
        (runnable, result)
    });

    while let Some(event) = nrx.recv().await {
        if event.kind == EventKind::Final {
            // The nested final is an internal signal; flow termination is
            // the flow's own decision.
            continue;
        }
        let event = event.with_path_prefix(&node.id).with_path_prefix(flow_id);
        if tx.send(event).await.is_err() {
            break;
        }
    }

    match handle.await {
        Ok((runnable, result)) => (runnable.outputs(), result),
        Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{probe_node, ProbeLog};
    use serde_json::json;

    async fn run_flow(flow: &mut SequentialFlow, ctx: ExecutionContext) -> Vec<ExecutionEvent> {
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut events = Vec::new();
        let driver = flow.run_stream(ctx, tx);
        tokio::pin!(driver);
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => events.push(event),
                    None => break,
                },
                result = &mut driver => {
                    result.unwrap();
                    while let Some(event) = rx.recv().await {
                        events.push(event);
                    }
                    break;
                }
            }
        }
        events
    }

    #[tokio::test]
    async fn routes_on_selector_and_strips_nested_final() {
        let log = ProbeLog::default();
        let a = probe_node("a", &log).with_next_selector(Box::new(|ctx| {
            ctx.get_str("route").map(str::to_string)
        }));
        let b = probe_node("b", &log);
        let c = probe_node("c", &log);
        let mut flow = SequentialFlow::new("test", vec![a, b, c]);

        let ctx = ExecutionContext::new("s1").set("route", json!("c"));
        let events = run_flow(&mut flow, ctx).await;

        assert_eq!(log.visits(), vec!["a", "c"]);
        // Exactly one final event: the flow's own.
        let finals = events.iter().filter(|e| e.kind == EventKind::Final).count();
        assert_eq!(finals, 1);
        // flow_step headers carry the flow id in their path.
        let headers: Vec<_> = events.iter().filter(|e| e.kind == EventKind::FlowStep).collect();
        assert_eq!(headers.len(), 2);
        assert!(headers[0].execution_path[0].starts_with("flow-test"));
    }

    #[tokio::test]
    async fn missing_selector_is_terminal() {
        let log = ProbeLog::default();
        let mut flow = SequentialFlow::new(
            "test",
            vec![probe_node("a", &log), probe_node("b", &log)],
        );
        run_flow(&mut flow, ExecutionContext::new("s1")).await;
        assert_eq!(log.visits(), vec!["a"]);
    }

    #[tokio::test]
    async fn revisit_terminates() {
        let log = ProbeLog::default();
        let a = probe_node("a", &log)
            .with_next_selector(Box::new(|_| Some("a".to_string())));
        let mut flow = SequentialFlow::new("test", vec![a]);
        run_flow(&mut flow, ExecutionContext::new("s1")).await;
        assert_eq!(log.visits(), vec!["a"]);
    }

    #[tokio::test]
    async fn empty_output_adapter_does_not_touch_context() {
        let log = ProbeLog::default();
        let a = probe_node("a", &log)
            .with_output_adapter(Box::new(|_, _| Map::new()))
            .with_next_selector(Box::new(|ctx| {
                // Would route to "b" if the adapter had overwritten "keep".
                if ctx.get_str("keep") == Some("original") {
                    None
                } else {
                    Some("b".to_string())
                }
            }));
        let b = probe_node("b", &log);
        let mut flow = SequentialFlow::new("test", vec![a, b]);
        let ctx = ExecutionContext::new("s1").set("keep", json!("original"));
        run_flow(&mut flow, ctx).await;
        assert_eq!(log.visits(), vec!["a"]);
    }
}
