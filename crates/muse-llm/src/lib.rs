//! Streaming chat-completion client with tool-call support.
//!
//! Every call runs the transcript validator first so category-filtered memory
//! slices can never produce a provider rejection over tool pairing.

mod client;
mod error;
mod registry;
mod transcript;

pub use client::{DeltaEvent, LlmClient, ToolChoice, ToolResponse};
pub use error::{LlmError, Result};
pub use registry::LlmRegistry;
pub use transcript::validate_and_fix_messages;
