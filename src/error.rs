//! Error types for the sync layer.
//!
//! Fetch and admission failures are typed so callers can tell "the server has no
//! leads" apart from "we could not ask". Storage failures never escape the cache
//! layer; they are logged and the session keeps running in memory.

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the remote lead source.
#[derive(Debug, Error)]
pub enum FetchError {
  /// Network unreachable, connection reset, TLS failure...
  #[error("transport error: {0}")]
  Transport(String),

  /// Any non-2xx response other than a single-record 404.
  #[error("server responded with status {status}")]
  Status { status: u16 },

  /// Response body was not the expected JSON shape.
  #[error("malformed payload: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("lead {0} not found")]
  NotFound(String),

  #[error("request timed out after {0:?}")]
  Timeout(Duration),
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      // reqwest does not expose the configured value here
      return FetchError::Transport(format!("timed out: {}", e));
    }
    match e.status() {
      Some(status) => FetchError::Status {
        status: status.as_u16(),
      },
      None => FetchError::Transport(e.to_string()),
    }
  }
}

/// Why the refresh gate turned a request away.
///
/// A rejection is final for that request; nothing retries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
  #[error("refresh is cooling down, {}s remaining", remaining_secs(.remaining))]
  CoolingDown { remaining: Duration },

  #[error("a refresh is already in flight")]
  InFlight,
}

fn remaining_secs(remaining: &Duration) -> u64 {
  remaining.as_millis().div_ceil(1000) as u64
}

/// Error returned by refresh and load operations.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Rejected(#[from] Rejection),

  #[error(transparent)]
  Fetch(#[from] FetchError),
}

/// Persistent cache failure. Only ever logged.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to (de)serialize cache entry: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("cache lock poisoned")]
  Poisoned,

  #[error("storage unavailable: {0}")]
  Unavailable(String),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cooldown_message_rounds_up() {
    let r = Rejection::CoolingDown {
      remaining: Duration::from_millis(1),
    };
    assert_eq!(r.to_string(), "refresh is cooling down, 1s remaining");
  }

  #[test]
  fn test_parse_error_is_distinct_from_empty() {
    let err = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
    let fetch: FetchError = err.into();
    assert!(matches!(fetch, FetchError::Parse(_)));
  }
}
