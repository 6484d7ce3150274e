use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::CacheStorage;
use crate::event::EventSender;
use crate::leads::{LeadSource, Owner};

use super::auto::{spawn_auto_refresh, spawn_countdown};
use super::engine::{LeadSync, SyncSettings};

/// One signed-in owner's sync session.
///
/// Every background task hangs off the session's root token, so ending the
/// session stops them all before anything is cleared.
pub struct Session {
  sync: LeadSync,
  token: CancellationToken,
  tasks: Vec<JoinHandle<()>>,
}

impl Session {
  pub fn new(
    owner: Owner,
    source: Arc<dyn LeadSource>,
    storage: Arc<dyn CacheStorage>,
    settings: SyncSettings,
  ) -> Self {
    let token = CancellationToken::new();
    let sync = LeadSync::new(owner, source, storage, settings, token.child_token());
    Self {
      sync,
      token,
      tasks: Vec::new(),
    }
  }

  pub fn sync(&self) -> &LeadSync {
    &self.sync
  }

  /// Start the countdown ticker and, if `auto_refresh` is set, the
  /// automatic refresh loop.
  pub fn start_timers(
    &mut self,
    auto_refresh: Option<Duration>,
    countdown_tick: Duration,
    events: EventSender,
  ) {
    self.tasks.push(spawn_countdown(
      Arc::clone(self.sync.gate()),
      countdown_tick,
      self.token.child_token(),
      events.clone(),
    ));
    if let Some(interval) = auto_refresh {
      self.tasks.push(spawn_auto_refresh(
        self.sync.clone(),
        interval,
        self.token.child_token(),
        events,
      ));
    }
    debug!(tasks = self.tasks.len(), "session timers started");
  }

  /// Stop all timers, optionally wipe the cache (logout), and wait for
  /// pending cache writes.
  pub async fn end(mut self, clear_cache: bool) {
    self.token.cancel();
    for task in self.tasks.drain(..) {
      let _ = task.await;
    }
    if clear_cache {
      self.sync.clear_cache();
      self.sync.store().clear();
    }
    self.sync.flush().await;
    info!(owner = %self.sync.owner().id, clear_cache, "session ended");
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    self.token.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::event::EventHandler;
  use crate::sync::RefreshTrigger;
  use crate::testing::{lead, owner, StaticSource};

  #[tokio::test(start_paused = true)]
  async fn test_end_stops_timers_and_clears_cache() {
    let storage = Arc::new(MemoryStorage::new());
    let source = StaticSource::new(vec![lead("1", "new")]);
    let mut session = Session::new(
      owner(),
      source.clone(),
      storage.clone(),
      SyncSettings::default(),
    );
    let events = EventHandler::new();
    session.start_timers(
      Some(Duration::from_secs(60)),
      Duration::from_secs(1),
      events.sender(),
    );
    session.sync().refresh(RefreshTrigger::Initial).await.unwrap();
    let scope = session.sync().scope().clone();

    session.end(true).await;
    assert!(storage.get(&scope).unwrap().is_none());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(source.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_end_without_clearing_keeps_cache() {
    let storage = Arc::new(MemoryStorage::new());
    let source = StaticSource::new(vec![lead("1", "new")]);
    let session = Session::new(owner(), source, storage.clone(), SyncSettings::default());
    session.sync().refresh(RefreshTrigger::Initial).await.unwrap();
    let scope = session.sync().scope().clone();

    session.end(false).await;
    assert_eq!(storage.get(&scope).unwrap().unwrap().leads.len(), 1);
  }
}
