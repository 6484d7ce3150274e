//! Cache storage trait and its SQLite, in-memory and no-op backends.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::StorageError;
use crate::leads::Lead;

use super::traits::{CacheKey, CachedSnapshot, Scope, DETAIL_NAMESPACE, RECORDS_NAMESPACE};

/// Trait for cache storage backends.
///
/// Every call may fail. Writes replace whole entries, so a reader sees either
/// the old value or the new one.
pub trait CacheStorage: Send + Sync {
  /// Get the stored lead list for a scope.
  fn get(&self, scope: &Scope) -> Result<Option<CachedSnapshot>, StorageError>;

  /// Replace the stored lead list for a scope.
  fn put(&self, scope: &Scope, leads: &[Arc<Lead>]) -> Result<(), StorageError>;

  /// Get the per-lead override, if any.
  fn get_detail(&self, id: &str) -> Result<Option<Lead>, StorageError>;

  fn put_detail(&self, lead: &Lead) -> Result<(), StorageError>;

  /// Remove per-lead overrides for the given ids.
  fn drop_details(&self, ids: &[String]) -> Result<(), StorageError>;

  /// Remove a scope's list, or every entry in both namespaces when `None`.
  fn clear(&self, scope: Option<&Scope>) -> Result<(), StorageError>;
}

fn encode_list(leads: &[Arc<Lead>]) -> Result<Vec<u8>, StorageError> {
  let plain: Vec<&Lead> = leads.iter().map(|l| l.as_ref()).collect();
  Ok(serde_json::to_vec(&plain)?)
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _scope: &Scope) -> Result<Option<CachedSnapshot>, StorageError> {
    Ok(None) // Always miss
  }

  fn put(&self, _scope: &Scope, _leads: &[Arc<Lead>]) -> Result<(), StorageError> {
    Ok(()) // Discard
  }

  fn get_detail(&self, _id: &str) -> Result<Option<Lead>, StorageError> {
    Ok(None)
  }

  fn put_detail(&self, _lead: &Lead) -> Result<(), StorageError> {
    Ok(())
  }

  fn drop_details(&self, _ids: &[String]) -> Result<(), StorageError> {
    Ok(())
  }

  fn clear(&self, _scope: Option<&Scope>) -> Result<(), StorageError> {
    Ok(())
  }
}

/// Process-local storage. Entries are kept serialized, so what comes back has
/// been through the same encoding as the SQLite backend.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed a list with an explicit write time.
  pub fn insert_snapshot(
    &self,
    scope: &Scope,
    leads: &[Arc<Lead>],
    cached_at: DateTime<Utc>,
  ) -> Result<(), StorageError> {
    let data = encode_list(leads)?;
    self
      .entries
      .lock()
      .map_err(|_| StorageError::Poisoned)?
      .insert(CacheKey::Records(scope.clone()).to_string(), (data, cached_at));
    Ok(())
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, scope: &Scope) -> Result<Option<CachedSnapshot>, StorageError> {
    let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
    match entries.get(&CacheKey::Records(scope.clone()).to_string()) {
      Some((data, cached_at)) => Ok(Some(CachedSnapshot {
        leads: serde_json::from_slice(data)?,
        cached_at: *cached_at,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, scope: &Scope, leads: &[Arc<Lead>]) -> Result<(), StorageError> {
    self.insert_snapshot(scope, leads, Utc::now())
  }

  fn get_detail(&self, id: &str) -> Result<Option<Lead>, StorageError> {
    let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
    match entries.get(&CacheKey::Detail(id.to_string()).to_string()) {
      Some((data, _)) => Ok(Some(serde_json::from_slice(data)?)),
      None => Ok(None),
    }
  }

  fn put_detail(&self, lead: &Lead) -> Result<(), StorageError> {
    let data = serde_json::to_vec(lead)?;
    self
      .entries
      .lock()
      .map_err(|_| StorageError::Poisoned)?
      .insert(CacheKey::Detail(lead.id.clone()).to_string(), (data, Utc::now()));
    Ok(())
  }

  fn drop_details(&self, ids: &[String]) -> Result<(), StorageError> {
    let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
    for id in ids {
      entries.remove(&CacheKey::Detail(id.clone()).to_string());
    }
    Ok(())
  }

  fn clear(&self, scope: Option<&Scope>) -> Result<(), StorageError> {
    let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
    match scope {
      Some(scope) => {
        entries.remove(&CacheKey::Records(scope.clone()).to_string());
      }
      None => entries.clear(),
    }
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache entry; data is the JSON-encoded list or lead
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, entry_key)
);
"#;

impl SqliteStorage {
  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StorageError::Unavailable(format!("failed to create cache directory: {}", e))
      })?;
    }

    Self::with_connection(Connection::open(path)?)
  }

  pub fn open_in_memory() -> Result<Self, StorageError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StorageError> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn read(&self, namespace: &str, key: &str) -> Result<Option<(Vec<u8>, String)>, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let row = conn
      .query_row(
        "SELECT data, cached_at FROM cache_entries WHERE namespace = ? AND entry_key = ?",
        params![namespace, key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;
    Ok(row)
  }

  fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    conn.execute(
      "INSERT OR REPLACE INTO cache_entries (namespace, entry_key, data, cached_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![namespace, key, data],
    )?;
    Ok(())
  }
}

impl CacheStorage for SqliteStorage {
  fn get(&self, scope: &Scope) -> Result<Option<CachedSnapshot>, StorageError> {
    match self.read(RECORDS_NAMESPACE, scope.as_str())? {
      Some((data, cached_at)) => Ok(Some(CachedSnapshot {
        leads: serde_json::from_slice(&data)?,
        cached_at: parse_datetime(&cached_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, scope: &Scope, leads: &[Arc<Lead>]) -> Result<(), StorageError> {
    let data = encode_list(leads)?;
    self.write(RECORDS_NAMESPACE, scope.as_str(), &data)
  }

  fn get_detail(&self, id: &str) -> Result<Option<Lead>, StorageError> {
    match self.read(DETAIL_NAMESPACE, id)? {
      Some((data, _)) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  fn put_detail(&self, lead: &Lead) -> Result<(), StorageError> {
    let data = serde_json::to_vec(lead)?;
    self.write(DETAIL_NAMESPACE, &lead.id, &data)
  }

  fn drop_details(&self, ids: &[String]) -> Result<(), StorageError> {
    let mut conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let tx = conn.transaction()?;
    for id in ids {
      tx.execute(
        "DELETE FROM cache_entries WHERE namespace = ? AND entry_key = ?",
        params![DETAIL_NAMESPACE, id],
      )?;
    }
    tx.commit()?;
    Ok(())
  }

  fn clear(&self, scope: Option<&Scope>) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    match scope {
      Some(scope) => conn.execute(
        "DELETE FROM cache_entries WHERE namespace = ? AND entry_key = ?",
        params![RECORDS_NAMESPACE, scope.as_str()],
      )?,
      None => conn.execute("DELETE FROM cache_entries", [])?,
    };
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| StorageError::Unavailable(format!("bad cached_at '{}': {}", s, e)))
}
