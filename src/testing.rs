//! Fakes shared by unit tests.

use futures::future::{BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{CacheStorage, CachedSnapshot, Scope};
use crate::error::{FetchError, StorageError};
use crate::leads::{FetchedLeads, Lead, LeadSource, Owner};

pub fn lead(id: &str, status: &str) -> Lead {
  Lead {
    id: id.into(),
    name: format!("Lead {}", id),
    status: status.into(),
    ..Default::default()
  }
}

pub fn owner() -> Owner {
  Owner {
    id: "17".into(),
    email: "rep@example.com".into(),
    team: None,
  }
}

/// Lead source serving a settable list, with queued failures and an
/// optional response delay.
#[derive(Default)]
pub struct StaticSource {
  leads: Mutex<Vec<Lead>>,
  failures: Mutex<VecDeque<FetchError>>,
  delay: Mutex<Option<Duration>>,
  skipped: AtomicUsize,
  calls: AtomicUsize,
}

impl StaticSource {
  pub fn new(leads: Vec<Lead>) -> Arc<Self> {
    Arc::new(Self {
      leads: Mutex::new(leads),
      ..Default::default()
    })
  }

  pub fn set_leads(&self, leads: Vec<Lead>) {
    *self.leads.lock().unwrap() = leads;
  }

  pub fn fail_next(&self, error: FetchError) {
    self.failures.lock().unwrap().push_back(error);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// Report `n` undecodable elements alongside every list response.
  pub fn set_skipped(&self, n: usize) {
    self.skipped.store(n, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl LeadSource for StaticSource {
  fn fetch_all<'a>(&'a self, _owner: &'a Owner) -> BoxFuture<'a, Result<FetchedLeads, FetchError>> {
    async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let delay = *self.delay.lock().unwrap();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      if let Some(e) = self.failures.lock().unwrap().pop_front() {
        return Err(e);
      }
      Ok(FetchedLeads {
        leads: self.leads.lock().unwrap().clone(),
        skipped: self.skipped.load(Ordering::SeqCst),
      })
    }
    .boxed()
  }

  fn fetch_one<'a>(
    &'a self,
    id: &'a str,
    _owner: &'a Owner,
  ) -> BoxFuture<'a, Result<Lead, FetchError>> {
    async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if let Some(e) = self.failures.lock().unwrap().pop_front() {
        return Err(e);
      }
      self
        .leads
        .lock()
        .unwrap()
        .iter()
        .find(|l| l.id == id)
        .cloned()
        .ok_or_else(|| FetchError::NotFound(id.to_string()))
    }
    .boxed()
  }
}

/// Storage where every call fails.
pub struct FailingStorage;

fn unavailable<T>() -> Result<T, StorageError> {
  Err(StorageError::Unavailable("quota exceeded".into()))
}

impl CacheStorage for FailingStorage {
  fn get(&self, _scope: &Scope) -> Result<Option<CachedSnapshot>, StorageError> {
    unavailable()
  }

  fn put(&self, _scope: &Scope, _leads: &[Arc<Lead>]) -> Result<(), StorageError> {
    unavailable()
  }

  fn get_detail(&self, _id: &str) -> Result<Option<Lead>, StorageError> {
    unavailable()
  }

  fn put_detail(&self, _lead: &Lead) -> Result<(), StorageError> {
    unavailable()
  }

  fn drop_details(&self, _ids: &[String]) -> Result<(), StorageError> {
    unavailable()
  }

  fn clear(&self, _scope: Option<&Scope>) -> Result<(), StorageError> {
    unavailable()
  }
}
