use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use muse_agent::{
    AgentError, EventSender, ExecutionContext, Result, Runnable, EVENT_CHANNEL_CAPACITY,
};
use muse_core::types::{EventKind, ExecutionEvent, ExecutionState};

use crate::node::FlowNode;

enum QueueItem {
    Event(ExecutionEvent),
    NodeComplete {
        node_id: String,
        is_response: bool,
        /// Output-adapter result to merge into the flow context; empty means
        /// "no valid output, do not touch the context".
        updates: Map<String, Value>,
    },
}

/// Launches every node concurrently. Events from response nodes stream out
/// until all of them have completed, at which point the flow emits `final`
/// and returns — background nodes keep running. Exceptions in one node never
/// abort its siblings.
pub struct ParallelFlow {
    pub id: String,
    pub name: String,
    pub state: ExecutionState,
    pub nodes: Vec<Arc<FlowNode>>,
    background_tasks: Vec<(String, JoinHandle<()>)>,
    cancel_token: CancellationToken,
    outputs: Map<String, Value>,
}

impl ParallelFlow {
    pub fn new(name: impl Into<String>, nodes: Vec<FlowNode>) -> Self {
        let name = name.into();
        Self {
            id: format!("parallel-{}-{}", name, short_id()),
            name,
            state: ExecutionState::Idle,
            nodes: nodes.into_iter().map(Arc::new).collect(),
            background_tasks: Vec::new(),
            cancel_token: CancellationToken::new(),
            outputs: Map::new(),
        }
    }

    /// Wait for background branches to finish. Branches still pending at the
    /// deadline are cancelled. Returns node id → completed.
    pub async fn wait_background_tasks(&mut self, timeout: Duration) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        let deadline = tokio::time::Instant::now() + timeout;
        for (node_id, handle) in &mut self.background_tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let completed = tokio::time::timeout(remaining, &mut *handle).await.is_ok();
            if !completed {
                handle.abort();
            }
            results.insert(node_id.clone(), completed);
        }
        results
    }

    /// Deliver cooperative cancellation to background branches. Returns the
    /// number of branches still running when cancelled.
    pub fn cancel_background_tasks(&self) -> usize {
        self.cancel_token.cancel();
        let cancelled = self
            .background_tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count();
        info!(flow = %self.name, cancelled, "cancelled background tasks");
        cancelled
    }

    pub fn background_task_status(&self) -> HashMap<String, &'static str> {
        self.background_tasks
            .iter()
            .map(|(node_id, handle)| {
                let status = if handle.is_finished() { "completed" } else { "running" };
                (node_id.clone(), status)
            })
            .collect()
    }
}

#[async_trait]
impl Runnable for ParallelFlow {
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
        self.background_tasks.clear();

        let response_nodes: Vec<_> = self.nodes.iter().filter(|n| !n.is_background).cloned().collect();
        let background_nodes: Vec<_> = self.nodes.iter().filter(|n| n.is_background).cloned().collect();

        info!(
            flow = %self.name,
            response = response_nodes.len(),
            background = background_nodes.len(),
            "starting parallel execution"
        );

        let (qtx, mut qrx) = mpsc::channel::<QueueItem>(EVENT_CHANNEL_CAPACITY);

        for node in &response_nodes {
            tokio::spawn(run_node_to_queue(
                node.clone(),
                ctx.clone(),
                qtx.clone(),
                true,
                self.cancel_token.clone(),
            ));
        }
        for node in &background_nodes {
            let handle = tokio::spawn(run_node_to_queue(
                node.clone(),
                ctx.clone(),
                qtx.clone(),
                false,
                self.cancel_token.clone(),
            ));
            self.background_tasks.push((node.id.clone(), handle));
        }
        drop(qtx);

        let mut active_response: HashSet<String> =
            response_nodes.iter().map(|n| n.id.clone()).collect();
        let mut context = ctx;

        let _ = tx
            .send(
                ExecutionEvent::step(
                    1,
                    1,
                    format!("starting parallel execution of {} response nodes", response_nodes.len()),
                )
                .with_path_prefix(&self.id),
            )
            .await;

        while !active_response.is_empty() {
            match qrx.recv().await {
                Some(QueueItem::Event(event)) => {
                    let _ = tx.send(event.with_path_prefix(&self.id)).await;
                }
                Some(QueueItem::NodeComplete {
                    node_id,
                    is_response,
                    updates,
                }) => {
                    if !updates.is_empty() {
                        info!(
                            flow = %self.name,
                            node = %node_id,
                            keys = ?updates.keys().collect::<Vec<_>>(),
                            "output adapter updated context"
                        );
                        context = context.merge(updates);
                    }
                    if is_response && active_response.remove(&node_id) {
                        info!(
                            flow = %self.name,
                            node_id,
                            remaining = active_response.len(),
                            "response node completed"
                        );
                    }
                }
                None => break,
            }
        }

        let running = self
            .background_tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count();
        let mut final_event = ExecutionEvent::final_event().with_path_prefix(&self.id);
        final_event.metadata = Some(json!({
            "background_tasks_count": self.background_tasks.len(),
            "background_tasks_running": running,
        }));
        let _ = tx.send(final_event).await;

        info!(
            flow = %self.name,
            background_running = running,
            "response stream ended, background tasks continue"
        );
        self.outputs = context.data.clone();
        self.state = ExecutionState::Finished;
        Ok(())
    }

    fn outputs(&self) -> Map<String, Value> {
        self.outputs.clone()
    }
}

/// Run one node, pushing its events and a completion marker into the shared
/// queue. The marker carries the node's output-adapter result so the flow can
/// merge it into the shared context. Errors become one error event; siblings
/// are unaffected.
async fn run_node_to_queue(
    node: Arc<FlowNode>,
    ctx: ExecutionContext,
    qtx: mpsc::Sender<QueueItem>,
    is_response: bool,
    cancel: CancellationToken,
) {
    let node_ctx = match &node.input_adapter {
        Some(adapter) => adapter(&ctx),
        None => ctx.clone(),
    };

    let mut runnable = (node.runnable_factory)(&node_ctx);
    let (ntx, mut nrx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let node_id = node.id.clone();
    let driver = tokio::spawn(async move {
        let result = runnable.run_stream(node_ctx, ntx).await;
        (runnable, result)
    });

    loop {
        tokio::select! {
            event = nrx.recv() => match event {
                Some(event) => {
                    if event.kind == EventKind::Final {
                        continue;
                    }
                    let event = event.with_path_prefix(&node_id);
                    if qtx.send(QueueItem::Event(event)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = cancel.cancelled() => {
                info!(node = %node_id, "node cancelled");
                driver.abort();
                break;
            }
        }
    }

    let updates = match driver.await {
        Ok((runnable, Ok(()))) => {
            info!(node = %node_id, "node completed");
            match &node.output_adapter {
                Some(adapter) => adapter(&runnable.outputs(), &ctx),
                None => Map::new(),
            }
        }
        Ok((_, Err(e))) => {
            warn!(node = %node_id, error = %e, "node failed");
            let event = ExecutionEvent::error(format!("Node {} failed: {e}", node.name))
                .with_path_prefix(&node_id);
            let _ = qtx.send(QueueItem::Event(event)).await;
            Map::new()
        }
        Err(join_error) if join_error.is_cancelled() => Map::new(),
        Err(join_error) => {
            warn!(node = %node_id, error = %join_error, "node task panicked");
            let event = ExecutionEvent::error(format!("Node {} failed: {join_error}", node.name))
                .with_path_prefix(&node_id);
            let _ = qtx.send(QueueItem::Event(event)).await;
            Map::new()
        }
    };

    let _ = qtx
        .send(QueueItem::NodeComplete {
            node_id,
            is_response,
            updates,
        })
        .await;
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{probe_node, slow_probe_node, ProbeLog};

    async fn run_collect(flow: &mut ParallelFlow, ctx: ExecutionContext) -> Vec<ExecutionEvent> {
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
                    while let Ok(event) = rx.try_recv() {
                        events.push(event);
                    }
                    break;
                }
            }
        }
        events
    }

    #[tokio::test]
    async fn final_emitted_when_response_nodes_done_background_still_running() {
        let log = ProbeLog::default();
        let response = probe_node("response", &log);
        let background = slow_probe_node("background", &log, Duration::from_millis(300)).background();
        let mut flow = ParallelFlow::new("test", vec![background, response]);

        let events = run_collect(&mut flow, ExecutionContext::new("s1")).await;
        let final_event = events.iter().find(|e| e.kind == EventKind::Final).unwrap();
        let meta = final_event.metadata.as_ref().unwrap();
        assert_eq!(meta["background_tasks_count"], 1);
        assert_eq!(meta["background_tasks_running"], 1);
        assert_eq!(flow.background_task_status()["background"], "running");

        let results = flow.wait_background_tasks(Duration::from_secs(30)).await;
        assert_eq!(results["background"], true);
        assert!(log.visits().contains(&"background".to_string()));
    }

    #[tokio::test]
    async fn node_error_does_not_abort_siblings() {
        let log = ProbeLog::default();
        let failing = crate::test_support::failing_node("bad");
        let ok = probe_node("ok", &log);
        let mut flow = ParallelFlow::new("test", vec![failing, ok]);

        let events = run_collect(&mut flow, ExecutionContext::new("s1")).await;
        assert!(events.iter().any(|e| e.kind == EventKind::Error));
        assert!(events.iter().any(|e| e.kind == EventKind::Final));
        assert_eq!(log.visits(), vec!["ok"]);
    }

    #[tokio::test]
    async fn node_output_adapter_merges_into_flow_outputs() {
        let log = ProbeLog::default();
        let with_adapter = probe_node("decider", &log)
            .with_output_adapter(Box::new(|outputs, _ctx| outputs.clone()));
        let without_adapter = probe_node("plain", &log);
        let mut flow = ParallelFlow::new("test", vec![with_adapter, without_adapter]);

        run_collect(&mut flow, ExecutionContext::new("s1")).await;
        let outputs = flow.outputs();
        assert_eq!(
            outputs.get("probe").and_then(|v| v.as_str()),
            Some("decider")
        );
    }

    #[tokio::test]
    async fn empty_adapter_result_does_not_touch_context() {
        let log = ProbeLog::default();
        let node = probe_node("quiet", &log)
            .with_output_adapter(Box::new(|_, _| Map::new()));
        let mut flow = ParallelFlow::new("test", vec![node]);

        let ctx = ExecutionContext::new("s1").set("keep", serde_json::json!("original"));
        run_collect(&mut flow, ctx).await;
        let outputs = flow.outputs();
        assert_eq!(
            outputs.get("keep").and_then(|v| v.as_str()),
            Some("original")
        );
        assert!(outputs.get("probe").is_none());
    }

    #[tokio::test]
    async fn cancel_background_tasks_stops_them() {
        let log = ProbeLog::default();
        let response = probe_node("response", &log);
        let background =
            slow_probe_node("background", &log, Duration::from_secs(30)).background();
        let mut flow = ParallelFlow::new("test", vec![background, response]);

        run_collect(&mut flow, ExecutionContext::new("s1")).await;
        let cancelled = flow.cancel_background_tasks();
        assert_eq!(cancelled, 1);
        let results = flow.wait_background_tasks(Duration::from_secs(1)).await;
        // Cancelled branch never completes its work.
        assert!(!log.visits().contains(&"background".to_string()) || !results["background"]);
    }
}
