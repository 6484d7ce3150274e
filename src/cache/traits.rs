//! Cache keys and result metadata.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::leads::{Lead, Owner};

pub const RECORDS_NAMESPACE: &str = "records";
pub const DETAIL_NAMESPACE: &str = "recordDetail";

/// Owner namespace for cached lists.
///
/// Derived from owner id, email and team so two identities signed in on the
/// same machine never read each other's leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope(String);

impl Scope {
  pub fn for_owner(owner: &Owner) -> Self {
    let input = format!(
      "{}\u{1f}{}\u{1f}{}",
      owner.id,
      owner.email.trim().to_lowercase(),
      owner.team.as_deref().unwrap_or("")
    );

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A key in one of the two cache namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
  /// Full lead list for a scope
  Records(Scope),
  /// Single-lead override
  Detail(String),
}

impl CacheKey {
  pub fn namespace(&self) -> &'static str {
    match self {
      CacheKey::Records(_) => RECORDS_NAMESPACE,
      CacheKey::Detail(_) => DETAIL_NAMESPACE,
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheKey::Records(scope) => write!(f, "{}:{}", RECORDS_NAMESPACE, scope),
      CacheKey::Detail(id) => write!(f, "{}:{}", DETAIL_NAMESPACE, id),
    }
  }
}

/// A stored lead list and when it was written.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
  pub leads: Vec<Lead>,
  pub cached_at: DateTime<Utc>,
}

/// Result of a load, including metadata about where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Network unavailable, serving what we had.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where loaded data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  Network,
  CacheFresh,
  Offline,
}

/// Shared, read-only view of the lead list.
pub type LeadSet = Arc<[Arc<Lead>]>;
