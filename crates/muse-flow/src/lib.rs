//! Flow core: `Runnable` composites.
//!
//! A flow owns an ordered list of [`FlowNode`]s, each packaging a runnable
//! factory, optional context adapters, and a conditional selector for the
//! next node. [`SequentialFlow`] serialises nodes with conditional routing;
//! [`ParallelFlow`] fans out into response and background branches, closing
//! the response stream when every response node has completed while
//! background branches keep running.

mod character;
mod lina;
mod node;
mod parallel;
mod sequential;
mod sera;
#[cfg(test)]
pub(crate) mod test_support;

pub use character::character_flow;
pub use lina::lina_flow;
pub use node::{FlowNode, FlowSpec};
pub use parallel::ParallelFlow;
pub use sequential::SequentialFlow;
pub use sera::sera_flow;
