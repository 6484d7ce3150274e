//! Lead records, wire decoding, change detection and the remote source.

mod api_types;
mod client;
mod fingerprint;
mod reconcile;
mod types;

pub use api_types::FetchedLeads;
pub use client::{HttpLeadSource, LeadSource};
pub use fingerprint::{Fingerprinter, LeadField, DEFAULT_FIELDS};
pub use reconcile::{reconcile, LeadOrder, Reconciliation, SortKey};
pub use types::{Lead, Owner};
