//! HTTP boundary for the Muse engine: OpenAI-style chat/flow completions over
//! SSE, plus sessions, virtual time, archives, search, memory, character, and
//! model endpoints.

pub mod app;
pub mod http;
pub mod sse;
