//! Refresh scheduling, reconciliation into the store, and session timers.

mod auto;
mod engine;
mod gate;
mod session;
mod store;

pub use engine::{RefreshOutcome, SyncSettings};
pub use gate::RefreshTrigger;
pub use session::Session;
