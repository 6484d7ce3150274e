//! Write-behind cache layer.
//!
//! All storage traffic goes through one worker task, so operations apply in
//! the order they were submitted and a read always sees earlier writes.
//! Failures are logged and turned into misses; callers never see them.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::leads::Lead;

use super::storage::CacheStorage;
use super::traits::{CachedSnapshot, LeadSet, Scope};

enum CacheOp {
  Put { scope: Scope, leads: LeadSet },
  PutDetail(Arc<Lead>),
  DropDetails(Vec<String>),
  Clear(Option<Scope>),
  Get {
    scope: Scope,
    reply: oneshot::Sender<Option<CachedSnapshot>>,
  },
  GetDetail {
    id: String,
    reply: oneshot::Sender<Option<Lead>>,
  },
  Flush(oneshot::Sender<()>),
}

/// Handle to the cache worker. Cheap to clone.
#[derive(Clone)]
pub struct CacheLayer {
  tx: mpsc::UnboundedSender<CacheOp>,
}

impl CacheLayer {
  /// Start the worker on the current runtime. It stops when every handle is
  /// dropped.
  pub fn spawn(storage: Arc<dyn CacheStorage>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_worker(storage, rx));
    Self { tx }
  }

  fn submit(&self, op: CacheOp) -> bool {
    if self.tx.send(op).is_err() {
      warn!("cache worker is gone, continuing in memory only");
      return false;
    }
    true
  }

  /// Queue a replacement of the scope's list.
  pub fn put(&self, scope: &Scope, leads: LeadSet) {
    self.submit(CacheOp::Put {
      scope: scope.clone(),
      leads,
    });
  }

  pub fn put_detail(&self, lead: Arc<Lead>) {
    self.submit(CacheOp::PutDetail(lead));
  }

  pub fn drop_details(&self, ids: Vec<String>) {
    if !ids.is_empty() {
      self.submit(CacheOp::DropDetails(ids));
    }
  }

  /// Queue a wipe of one scope, or of everything.
  pub fn clear(&self, scope: Option<&Scope>) {
    self.submit(CacheOp::Clear(scope.cloned()));
  }

  /// Read the scope's list. Errors are logged and reported as a miss.
  pub async fn get(&self, scope: &Scope) -> Option<CachedSnapshot> {
    let (reply, rx) = oneshot::channel();
    if !self.submit(CacheOp::Get {
      scope: scope.clone(),
      reply,
    }) {
      return None;
    }
    rx.await.ok().flatten()
  }

  pub async fn get_detail(&self, id: &str) -> Option<Lead> {
    let (reply, rx) = oneshot::channel();
    if !self.submit(CacheOp::GetDetail {
      id: id.to_string(),
      reply,
    }) {
      return None;
    }
    rx.await.ok().flatten()
  }

  /// Wait until everything queued before this call has been applied.
  pub async fn flush(&self) {
    let (reply, rx) = oneshot::channel();
    if self.submit(CacheOp::Flush(reply)) {
      let _ = rx.await;
    }
  }
}

async fn run_worker(storage: Arc<dyn CacheStorage>, mut rx: mpsc::UnboundedReceiver<CacheOp>) {
  while let Some(op) = rx.recv().await {
    apply(storage.as_ref(), op);
  }
  debug!("cache worker stopped");
}

fn apply(storage: &dyn CacheStorage, op: CacheOp) {
  match op {
    CacheOp::Put { scope, leads } => {
      let count = leads.len();
      logged("put", storage.put(&scope, &leads));
      debug!(%scope, count, "cached lead list");
    }
    CacheOp::PutDetail(lead) => {
      logged("put_detail", storage.put_detail(&lead));
    }
    CacheOp::DropDetails(ids) => {
      let count = ids.len();
      logged("drop_details", storage.drop_details(&ids));
      debug!(count, "dropped detail overrides");
    }
    CacheOp::Clear(scope) => {
      logged("clear", storage.clear(scope.as_ref()));
      debug!(all = scope.is_none(), "cache cleared");
    }
    CacheOp::Get { scope, reply } => {
      let _ = reply.send(logged("get", storage.get(&scope)).flatten());
    }
    CacheOp::GetDetail { id, reply } => {
      let _ = reply.send(logged("get_detail", storage.get_detail(&id)).flatten());
    }
    CacheOp::Flush(reply) => {
      let _ = reply.send(());
    }
  }
}

fn logged<T>(op: &str, result: Result<T, StorageError>) -> Option<T> {
  match result {
    Ok(v) => Some(v),
    Err(e) => {
      warn!(op, error = %e, "cache storage failed, continuing in memory only");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use crate::leads::Owner;
  use crate::testing::FailingStorage;

  fn scope() -> Scope {
    Scope::for_owner(&Owner {
      id: "1".into(),
      email: "rep@example.com".into(),
      team: None,
    })
  }

  fn set(ids: &[&str]) -> LeadSet {
    ids
      .iter()
      .map(|id| {
        Arc::new(Lead {
          id: id.to_string(),
          ..Default::default()
        })
      })
      .collect()
  }

  #[tokio::test]
  async fn test_reads_observe_earlier_writes() {
    let layer = CacheLayer::spawn(Arc::new(MemoryStorage::new()));
    layer.put(&scope(), set(&["1"]));
    layer.put(&scope(), set(&["1", "2"]));
    let snap = layer.get(&scope()).await.unwrap();
    assert_eq!(snap.leads.len(), 2);

    layer.clear(None);
    assert!(layer.get(&scope()).await.is_none());
  }

  #[tokio::test]
  async fn test_failures_become_misses() {
    let layer = CacheLayer::spawn(Arc::new(FailingStorage));
    layer.put(&scope(), set(&["1"]));
    layer.put_detail(set(&["1"])[0].clone());
    layer.flush().await;
    assert!(layer.get(&scope()).await.is_none());
    assert!(layer.get_detail("1").await.is_none());
  }

  #[tokio::test]
  async fn test_detail_put_then_drop_applies_in_order() {
    let storage = Arc::new(MemoryStorage::new());
    let layer = CacheLayer::spawn(storage.clone());
    let leads = set(&["1", "2"]);
    layer.put_detail(Arc::clone(&leads[0]));
    layer.put_detail(Arc::clone(&leads[1]));
    layer.drop_details(vec!["1".to_string()]);

    assert!(layer.get_detail("1").await.is_none());
    assert_eq!(layer.get_detail("2").await.unwrap().id, "2");
    assert!(storage.get_detail("2").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_flush_waits_for_queued_writes() {
    let storage = Arc::new(MemoryStorage::new());
    let layer = CacheLayer::spawn(storage.clone());
    layer.put(&scope(), set(&["1", "2", "3"]));
    layer.flush().await;
    assert_eq!(storage.get(&scope()).unwrap().unwrap().leads.len(), 3);
  }
}
