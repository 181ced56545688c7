//! Per-session virtual clocks.
//!
//! Every persisted timestamp in the conversation domain is produced through
//! [`TimeProvider`], so a paused or accelerated session yields self-consistent
//! history.

mod provider;
mod types;

pub use provider::{ClockLoader, ClockSnapshot, TimeProvider};
pub use types::{ClockError, SessionClock, TimeAction, TimeActionKind, TimeFormat};
