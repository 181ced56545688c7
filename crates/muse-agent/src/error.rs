use thiserror::Error;

use muse_core::types::ExecutionState;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Cannot run from state {state:?}")]
    InvalidState { state: ExecutionState },

    #[error("LLM error: {0}")]
    Llm(#[from] muse_llm::LlmError),

    #[error("Memory error: {0}")]
    Memory(#[from] muse_core::MuseError),

    #[error("Flow error: {0}")]
    Flow(String),

    #[error("Empty response from model")]
    EmptyResponse,
}

pub type Result<T> = std::result::Result<T, AgentError>;
