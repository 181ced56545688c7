//! Agent core: the `Runnable` abstraction and its agent implementations.
//!
//! A [`Runnable`] produces [`ExecutionEvent`]s into a bounded channel; agents
//! and flows both satisfy it, so they compose freely. Agents share one driver
//! loop (step budget, stuck detection, state discipline) and differ in their
//! per-step behaviour.

mod base;
mod chat;
mod context;
mod error;
mod prompts;
mod runnable;
#[cfg(test)]
pub(crate) mod test_support;
mod toolcall;
mod user;

pub use base::{run_agent, AgentBehavior, AgentCore};
pub use chat::{ChatAgent, ChatMode};
pub use context::ExecutionContext;
pub use error::{AgentError, Result};
pub use prompts::DEFAULT_ROLEPLAY_PROMPT;
pub use runnable::{collect_tokens, EventEmitter, EventSender, Runnable, EVENT_CHANNEL_CAPACITY};
pub use toolcall::{ToolCallAgent, ToolInvocation};
pub use user::UserAgent;

pub mod presets;
