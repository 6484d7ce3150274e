//! Lead sync orchestration: admission, fetch, reconcile, publish, persist.

use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, CacheResult, CacheStorage, Scope};
use crate::config::Config;
use crate::error::{FetchError, SyncError};
use crate::leads::{FetchedLeads, Fingerprinter, Lead, LeadOrder, LeadSource, Owner};

use super::gate::{RefreshGate, RefreshTrigger};
use super::store::LeadStore;

/// Tunables for a sync session.
#[derive(Debug, Clone)]
pub struct SyncSettings {
  pub cooldown: Duration,
  pub fetch_timeout: Duration,
  pub flag_display: Duration,
  pub stale_after: Duration,
  pub fingerprinter: Fingerprinter,
  pub order: LeadOrder,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      cooldown: Duration::from_millis(120_000),
      fetch_timeout: Duration::from_secs(30),
      flag_display: Duration::from_millis(5_000),
      stale_after: Duration::from_secs(300),
      fingerprinter: Fingerprinter::default(),
      order: LeadOrder::default(),
    }
  }
}

impl From<&Config> for SyncSettings {
  fn from(config: &Config) -> Self {
    Self {
      cooldown: config.sync.cooldown(),
      fetch_timeout: Duration::from_secs(config.remote.timeout_secs),
      flag_display: config.sync.flag_display(),
      stale_after: config.sync.stale_after(),
      fingerprinter: Fingerprinter::new(config.fingerprint_fields.clone()),
      order: config.sort.into(),
    }
  }
}

/// Summary of one completed refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
  pub trigger: RefreshTrigger,
  pub total: usize,
  pub new_count: usize,
  pub modified_count: usize,
  pub removed_count: usize,
  /// Undecodable records plus those with a missing or duplicate id
  pub dropped_count: usize,
  pub first_load: bool,
}

/// Keeps one owner's lead list in sync with the remote source.
#[derive(Clone)]
pub struct LeadSync {
  owner: Owner,
  source: Arc<dyn LeadSource>,
  cache: CacheLayer,
  store: LeadStore,
  gate: Arc<RefreshGate>,
  settings: Arc<SyncSettings>,
}

impl LeadSync {
  /// Must be called inside a Tokio runtime; the cache worker is spawned here.
  pub fn new(
    owner: Owner,
    source: Arc<dyn LeadSource>,
    storage: Arc<dyn CacheStorage>,
    settings: SyncSettings,
    shutdown: CancellationToken,
  ) -> Self {
    let cache = CacheLayer::spawn(storage);
    let scope = Scope::for_owner(&owner);
    let store = LeadStore::new(scope, cache.clone(), settings.flag_display, shutdown);
    let gate = RefreshGate::new(settings.cooldown);

    Self {
      owner,
      source,
      cache,
      store,
      gate,
      settings: Arc::new(settings),
    }
  }

  pub fn owner(&self) -> &Owner {
    &self.owner
  }

  pub fn scope(&self) -> &Scope {
    self.store.scope()
  }

  pub fn store(&self) -> &LeadStore {
    &self.store
  }

  pub fn gate(&self) -> &Arc<RefreshGate> {
    &self.gate
  }

  /// Cache-first load for session start.
  ///
  /// 1. Fresh cache: serve it without fetching
  /// 2. Stale cache: serve it, then fetch; on failure keep serving it (offline)
  /// 3. No cache: fetch, errors propagate
  pub async fn load(&self) -> Result<CacheResult<usize>, SyncError> {
    let Some(cached_at) = self.hydrate().await else {
      debug!("no cached leads, fetching");
      self.refresh(RefreshTrigger::Initial).await?;
      return Ok(CacheResult::from_network(self.store.len()));
    };

    let age = (Utc::now() - cached_at).to_std().unwrap_or_default();
    if age < self.settings.stale_after {
      debug!(?age, count = self.store.len(), "serving fresh cache");
      return Ok(CacheResult::from_cache(self.store.len(), cached_at));
    }

    match self.refresh(RefreshTrigger::Initial).await {
      Ok(_) => Ok(CacheResult::from_network(self.store.len())),
      Err(e) => {
        warn!(error = %e, "refresh failed, serving cached leads");
        Ok(CacheResult::offline(self.store.len(), cached_at))
      }
    }
  }

  /// Fill the store from the cache without fetching. Returns when the cached
  /// list was written, or `None` on a miss.
  pub async fn hydrate(&self) -> Option<DateTime<Utc>> {
    let cached = self.cache.get(self.scope()).await?;
    self.store.hydrate(cached.leads);
    Some(cached.cached_at)
  }

  /// Fetch the full list and reconcile it into the store.
  ///
  /// Rejected requests are not retried. On fetch failure the store keeps its
  /// current contents.
  pub async fn refresh(&self, trigger: RefreshTrigger) -> Result<RefreshOutcome, SyncError> {
    let _permit = self.gate.try_admit(trigger)?;

    let fetched = match self.fetch_all().await {
      Ok(fetched) => fetched,
      Err(e) => {
        warn!(?trigger, error = %e, "lead refresh failed");
        return Err(e.into());
      }
    };

    // Baseline is whatever the store holds now, including optimistic edits
    // made while the fetch was running.
    let r = self.store.apply_fetch(
      fetched.leads,
      &self.settings.fingerprinter,
      &self.settings.order,
    );

    let outcome = RefreshOutcome {
      trigger,
      total: r.merged.len(),
      new_count: r.new_count,
      modified_count: r.modified_count,
      removed_count: r.removed_count,
      dropped_count: r.dropped_count + fetched.skipped,
      first_load: r.first_load,
    };
    info!(
      ?trigger,
      total = outcome.total,
      new = outcome.new_count,
      modified = outcome.modified_count,
      removed = outcome.removed_count,
      dropped = outcome.dropped_count,
      "leads refreshed"
    );
    Ok(outcome)
  }

  /// Wipe the persistent cache, then refetch ignoring the cooldown.
  pub async fn force_refresh(&self) -> Result<RefreshOutcome, SyncError> {
    self.cache.clear(None);
    self.refresh(RefreshTrigger::Forced).await
  }

  async fn fetch_all(&self) -> Result<FetchedLeads, FetchError> {
    let timeout = self.settings.fetch_timeout;
    tokio::time::timeout(timeout, self.source.fetch_all(&self.owner))
      .await
      .map_err(|_| FetchError::Timeout(timeout))?
  }

  /// Look up one lead: detail override, then the list, then the server.
  pub async fn lead(&self, id: &str) -> Result<Arc<Lead>, FetchError> {
    if let Some(lead) = self.cache.get_detail(id).await {
      return Ok(Arc::new(lead));
    }
    if let Some(lead) = self.store.get(id) {
      return Ok(lead);
    }

    let timeout = self.settings.fetch_timeout;
    let lead = tokio::time::timeout(timeout, self.source.fetch_one(id, &self.owner))
      .await
      .map_err(|_| FetchError::Timeout(timeout))??;
    if !lead.has_id() {
      return Err(FetchError::NotFound(id.to_string()));
    }

    let lead = Arc::new(lead);
    self.cache.put_detail(Arc::clone(&lead));
    Ok(lead)
  }

  /// Apply an already-confirmed change to one lead.
  pub fn update_one(&self, lead: Lead) -> Option<Arc<Lead>> {
    self.store.update_one(lead)
  }

  /// Show `lead` immediately, keep it if `confirm` succeeds, undo it if not.
  ///
  /// `confirm` is the server call that makes the change real (a status
  /// update, say). Nothing is persisted until it succeeds. A lead that is not
  /// in the list is not shown early; once confirmed it is stored as a detail
  /// override, the same as `update_one`.
  pub async fn update_optimistic<F, E>(&self, lead: Lead, confirm: F) -> Result<(), E>
  where
    F: Future<Output = Result<(), E>>,
    E: Display,
  {
    let id = lead.id.clone();
    let pending = self.store.apply_optimistic(lead.clone());

    match confirm.await {
      Ok(()) => {
        match &pending {
          Some(update) => self.store.commit(update),
          None => {
            self.store.update_one(lead);
          }
        }
        Ok(())
      }
      Err(e) => {
        warn!(%id, error = %e, "optimistic update rejected, rolling back");
        if let Some(update) = pending {
          self.store.rollback(update);
        }
        Err(e)
      }
    }
  }

  /// Wipe both cache namespaces.
  pub fn clear_cache(&self) {
    self.cache.clear(None);
  }

  /// Wait for queued cache writes to land.
  pub async fn flush(&self) {
    self.cache.flush().await;
  }
}
