//! Memory facade: the read/write API agents and tools use for conversation
//! history, schedules, scenarios, events, and relations.
//!
//! Writes go to SQLite first, then mirror to the search indices best-effort.
//! Keyword queries prefer the mirror and fall back to SQL LIKE scans.

mod docs;
mod memory;
mod stores;

pub use memory::Memory;
pub use stores::Stores;
