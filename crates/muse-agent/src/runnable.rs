use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use muse_core::types::{ExecutionEvent, ExecutionState};

use crate::context::ExecutionContext;
use crate::error::Result;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

pub type EventSender = mpsc::Sender<ExecutionEvent>;

/// A composable executable unit. Agents and flows both satisfy it: callers
/// hand in a context and a channel, then range over the channel until it
/// closes or the `final` sentinel is observed.
#[async_trait]
pub trait Runnable: Send {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn state(&self) -> ExecutionState;

    /// Execute, emitting events into `tx` in program order. The terminal
    /// `final` event is emitted before returning on the success path.
    async fn run_stream(&mut self, ctx: ExecutionContext, tx: EventSender) -> Result<()>;

    /// Structured outputs published after a run; flow output adapters read
    /// these to update the flow context.
    fn outputs(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Thin wrapper over the event channel. `emit` reports whether the receiver
/// is still listening; producers stop early when it is gone.
#[derive(Clone)]
pub struct EventEmitter {
    tx: EventSender,
}

impl EventEmitter {
    pub fn new(tx: EventSender) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, event: ExecutionEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn sender(&self) -> EventSender {
        self.tx.clone()
    }
}

/// Drive a runnable to completion and concatenate its token contents.
pub async fn collect_tokens<R>(mut runnable: R, ctx: ExecutionContext) -> (R, Result<String>)
where
    R: Runnable + 'static,
{
    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let result = runnable.run_stream(ctx, tx).await;
        (runnable, result)
    });

    let mut buffer = String::new();
    while let Some(event) = rx.recv().await {
        if event.kind == muse_core::types::EventKind::Token {
            if let Some(content) = event.content {
                buffer.push_str(&content);
            }
        }
    }

    match handle.await {
        Ok((runnable, Ok(()))) => (runnable, Ok(buffer)),
        Ok((runnable, Err(e))) => (runnable, Err(e)),
        Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
    }
}
