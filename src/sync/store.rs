//! In-memory lead list with change notification.
//!
//! The store is the single owner of the current list. Readers get an
//! immutable `LeadSet` and can subscribe to replacements; all writes go
//! through `apply_fetch`, `update_one` or the optimistic pair, each of which
//! also queues a cache write so memory and disk converge.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{CacheLayer, LeadSet, Scope};
use crate::leads::{reconcile, Fingerprinter, Lead, LeadOrder, Reconciliation};

struct Inner {
  scope: Scope,
  tx: watch::Sender<LeadSet>,
  cache: CacheLayer,
  flag_display: Duration,
  /// Pending flag-expiry timer, replaced on every reconciliation
  flag_timer: Mutex<Option<CancellationToken>>,
  shutdown: CancellationToken,
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.shutdown.cancel();
  }
}

/// Shared handle to the lead list for one owner scope.
#[derive(Clone)]
pub struct LeadStore {
  inner: Arc<Inner>,
}

/// An optimistic edit waiting for its server call to finish.
#[derive(Debug)]
pub struct OptimisticUpdate {
  applied: Arc<Lead>,
  previous: Arc<Lead>,
}

impl OptimisticUpdate {
  pub fn lead(&self) -> &Arc<Lead> {
    &self.applied
  }
}

fn empty_set() -> LeadSet {
  Arc::from(Vec::<Arc<Lead>>::new())
}

impl LeadStore {
  /// `shutdown` cancels the flag-expiry timer; it is also cancelled when the
  /// last handle is dropped.
  pub fn new(
    scope: Scope,
    cache: CacheLayer,
    flag_display: Duration,
    shutdown: CancellationToken,
  ) -> Self {
    let (tx, _rx) = watch::channel(empty_set());
    Self {
      inner: Arc::new(Inner {
        scope,
        tx,
        cache,
        flag_display,
        flag_timer: Mutex::new(None),
        shutdown,
      }),
    }
  }

  pub fn scope(&self) -> &Scope {
    &self.inner.scope
  }

  /// Current list.
  pub fn snapshot(&self) -> LeadSet {
    self.inner.tx.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<LeadSet> {
    self.inner.tx.subscribe()
  }

  pub fn get(&self, id: &str) -> Option<Arc<Lead>> {
    self.inner.tx.borrow().iter().find(|l| l.id == id).cloned()
  }

  pub fn len(&self) -> usize {
    self.inner.tx.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Load a list read back from the cache. Not written back.
  pub fn hydrate(&self, leads: Vec<Lead>) {
    let mut seen = HashSet::new();
    let set: LeadSet = leads
      .into_iter()
      .filter(|l| l.has_id() && seen.insert(l.id.clone()))
      .map(Arc::new)
      .collect();
    debug!(count = set.len(), "store hydrated from cache");
    self.inner.tx.send_replace(set);
  }

  /// Replace the list wholesale and persist it.
  pub fn replace(&self, leads: Vec<Arc<Lead>>) {
    let flagged = leads.iter().any(|l| l.flags.is_set());
    self.inner.tx.send_replace(Arc::from(leads));
    self.persist();
    if flagged {
      self.schedule_flag_expiry();
    }
  }

  /// Reconcile `fetched` against the current list and publish the result.
  ///
  /// Runs under the store's write lock, so an optimistic update is either
  /// fully before the merge (and used as its baseline) or fully after it.
  pub fn apply_fetch(
    &self,
    fetched: Vec<Lead>,
    fingerprinter: &Fingerprinter,
    order: &LeadOrder,
  ) -> Reconciliation {
    let mut result = None;
    self.inner.tx.send_modify(|set| {
      let r = reconcile(set, fetched, fingerprinter, order);
      *set = Arc::from(r.merged.clone());
      result = Some(r);
    });
    let result = result.unwrap_or_default();

    self.persist();
    self.inner.cache.drop_details(result.modified_ids.clone());
    if result.new_count > 0 || result.modified_count > 0 {
      self.schedule_flag_expiry();
    }
    result
  }

  /// Swap in a new version of one lead and persist it.
  ///
  /// Returns the replaced lead, or `None` if no lead has that id (the list is
  /// left alone but the detail override is still written).
  pub fn update_one(&self, lead: Lead) -> Option<Arc<Lead>> {
    let lead = Arc::new(lead.without_flags());
    let previous = self.swap(&lead);
    if previous.is_none() {
      debug!(id = %lead.id, "update for a lead not in the list");
    }
    self.persist();
    self.inner.cache.put_detail(lead);
    previous
  }

  /// Apply an edit in memory only. Call `commit` once the server accepts it,
  /// or `rollback` if it doesn't.
  pub fn apply_optimistic(&self, lead: Lead) -> Option<OptimisticUpdate> {
    let applied = Arc::new(lead.without_flags());
    let previous = self.swap(&applied)?;
    Some(OptimisticUpdate { applied, previous })
  }

  pub fn commit(&self, update: &OptimisticUpdate) {
    self.persist();
    if self.is_current(&update.applied) {
      self.inner.cache.put_detail(Arc::clone(&update.applied));
    }
  }

  /// Restore the pre-edit lead, unless something newer has replaced the
  /// optimistic one in the meantime. Returns whether anything was restored.
  pub fn rollback(&self, update: OptimisticUpdate) -> bool {
    let restored = self.inner.tx.send_if_modified(|set| {
      let Some(idx) = set.iter().position(|l| Arc::ptr_eq(l, &update.applied)) else {
        return false;
      };
      let mut leads = set.to_vec();
      leads[idx] = Arc::clone(&update.previous);
      *set = Arc::from(leads);
      true
    });
    if restored {
      // another write may have persisted the optimistic lead meanwhile
      self.persist();
    } else {
      debug!(id = %update.applied.id, "optimistic edit already superseded, nothing to roll back");
    }
    restored
  }

  /// Drop everything held in memory.
  pub fn clear(&self) {
    self.cancel_flag_expiry();
    self.inner.tx.send_replace(empty_set());
  }

  fn is_current(&self, lead: &Arc<Lead>) -> bool {
    self
      .inner
      .tx
      .borrow()
      .iter()
      .any(|l| Arc::ptr_eq(l, lead))
  }

  /// Replace the lead with the same id, returning the old one.
  fn swap(&self, lead: &Arc<Lead>) -> Option<Arc<Lead>> {
    let mut previous = None;
    self.inner.tx.send_if_modified(|set| {
      let Some(idx) = set.iter().position(|l| l.id == lead.id) else {
        return false;
      };
      let mut leads = set.to_vec();
      previous = Some(std::mem::replace(&mut leads[idx], Arc::clone(lead)));
      *set = Arc::from(leads);
      true
    });
    previous
  }

  /// Queue the current list for the cache. The put is submitted under the
  /// store's write lock, so cache writes land in the order the list changed.
  fn persist(&self) {
    let inner = &self.inner;
    inner.tx.send_if_modified(|set| {
      inner.cache.put(&inner.scope, Arc::clone(set));
      false
    });
  }

  fn cancel_flag_expiry(&self) {
    let mut timer = self
      .inner
      .flag_timer
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if let Some(token) = timer.take() {
      token.cancel();
    }
  }

  /// Clear new/modified flags after the display window. A later
  /// reconciliation restarts the window.
  fn schedule_flag_expiry(&self) {
    if self.inner.shutdown.is_cancelled() {
      return;
    }
    let token = self.inner.shutdown.child_token();
    {
      let mut timer = self
        .inner
        .flag_timer
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      if let Some(previous) = timer.replace(token.clone()) {
        previous.cancel();
      }
    }

    let store: Weak<Inner> = Arc::downgrade(&self.inner);
    let delay = self.inner.flag_display;
    tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(delay) => {
          if let Some(inner) = store.upgrade() {
            LeadStore { inner }.clear_flags();
          }
        }
      }
    });
  }

  fn clear_flags(&self) {
    let cleared = self.inner.tx.send_if_modified(|set| {
      if !set.iter().any(|l| l.flags.is_set()) {
        return false;
      }
      *set = set
        .iter()
        .map(|l| {
          if l.flags.is_set() {
            Arc::new(l.without_flags())
          } else {
            Arc::clone(l)
          }
        })
        .collect();
      true
    });
    if cleared {
      debug!("change flags expired");
    }
  }
}

impl std::fmt::Debug for LeadStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LeadStore")
      .field("scope", &self.inner.scope)
      .field("len", &self.len())
      .finish()
  }
}
