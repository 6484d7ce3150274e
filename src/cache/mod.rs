//! Persistent lead cache.
//!
//! Two namespaces: `records:{scope}` holds the last full list for an owner,
//! `recordDetail:{id}` holds per-lead overrides written by optimistic edits.
//! Storage is best-effort; a failed read is a miss and a failed write is a
//! log line.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, LeadSet, Scope};
#[cfg(test)]
pub use traits::CachedSnapshot;
