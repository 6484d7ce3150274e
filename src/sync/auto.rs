//! Background timers: periodic automatic refresh and the cooldown countdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SyncError;
use crate::event::{EventSender, SyncEvent};

use super::engine::LeadSync;
use super::gate::{GateState, RefreshGate, RefreshTrigger};

/// Refresh every `interval` until `token` is cancelled.
///
/// The next attempt is scheduled whether or not the previous one was
/// admitted, so a rejection never stalls the loop.
pub fn spawn_auto_refresh(
  sync: LeadSync,
  interval: Duration,
  token: CancellationToken,
  events: EventSender,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    debug!(?interval, "auto-refresh started");
    loop {
      tokio::select! {
        _ = token.cancelled() => break,
        _ = tokio::time::sleep(interval) => {}
      }

      let result = tokio::select! {
        _ = token.cancelled() => break,
        r = sync.refresh(RefreshTrigger::Automatic) => r,
      };

      let event = match result {
        Ok(outcome) => SyncEvent::Refreshed(outcome),
        Err(SyncError::Rejected(rejection)) => SyncEvent::Rejected(rejection),
        Err(SyncError::Fetch(e)) => SyncEvent::Failed(e.to_string()),
      };
      // nobody listening is fine, keep refreshing
      let _ = events.send(event);
    }
    debug!("auto-refresh stopped");
  })
}

/// Report the cooldown every `tick`: `Countdown` while cooling down and a
/// single `Ready` once it ends.
pub fn spawn_countdown(
  gate: Arc<RefreshGate>,
  tick: Duration,
  token: CancellationToken,
  events: EventSender,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cooling = false;

    loop {
      tokio::select! {
        _ = token.cancelled() => break,
        _ = ticker.tick() => {}
      }

      let event = match gate.state() {
        GateState::CoolingDown { remaining } => {
          cooling = true;
          SyncEvent::Countdown(remaining)
        }
        GateState::Ready if cooling => {
          cooling = false;
          SyncEvent::Ready
        }
        GateState::Ready => continue,
      };
      if events.send(event).is_err() {
        break;
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::error::{FetchError, Rejection};
  use crate::event::EventHandler;
  use crate::sync::SyncSettings;
  use crate::testing::{lead, owner, StaticSource};

  fn sync_for(source: Arc<StaticSource>) -> LeadSync {
    LeadSync::new(
      owner(),
      source,
      Arc::new(MemoryStorage::new()),
      SyncSettings::default(),
      CancellationToken::new(),
    )
  }

  #[tokio::test(start_paused = true)]
  async fn test_auto_refresh_reschedules_after_rejection_and_failure() {
    let source = StaticSource::new(vec![lead("1", "new")]);
    let sync = sync_for(source.clone());
    // start the cooldown so the first automatic attempt is rejected
    sync.refresh(RefreshTrigger::Manual).await.unwrap();

    let mut events = EventHandler::new();
    let token = CancellationToken::new();
    let handle = spawn_auto_refresh(
      sync.clone(),
      Duration::from_secs(60),
      token.clone(),
      events.sender(),
    );

    assert!(matches!(
      events.next().await,
      Some(SyncEvent::Rejected(Rejection::CoolingDown { .. }))
    ));

    source.fail_next(FetchError::Transport("reset".into()));
    assert!(matches!(events.next().await, Some(SyncEvent::Failed(_))));

    source.set_leads(vec![lead("1", "new"), lead("2", "new")]);
    match events.next().await {
      Some(SyncEvent::Refreshed(outcome)) => assert_eq!(outcome.new_count, 1),
      other => panic!("expected refresh, got {:?}", other),
    }

    token.cancel();
    handle.await.unwrap();
    assert_eq!(source.calls(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_stops_auto_refresh() {
    let source = StaticSource::new(vec![lead("1", "new")]);
    let events = EventHandler::new();
    let token = CancellationToken::new();
    let handle = spawn_auto_refresh(
      sync_for(source.clone()),
      Duration::from_secs(60),
      token.clone(),
      events.sender(),
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    token.cancel();
    handle.await.unwrap();

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(source.calls(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_countdown_ticks_then_ready() {
    let gate = RefreshGate::new(Duration::from_secs(3));
    drop(gate.try_admit(RefreshTrigger::Manual).unwrap());

    let mut events = EventHandler::new();
    let token = CancellationToken::new();
    let handle = spawn_countdown(gate, Duration::from_secs(1), token.clone(), events.sender());

    let mut seen = Vec::new();
    loop {
      match events.next().await {
        Some(SyncEvent::Countdown(remaining)) => seen.push(remaining.as_secs()),
        Some(SyncEvent::Ready) => break,
        other => panic!("unexpected event {:?}", other),
      }
    }
    assert_eq!(seen, vec![3, 2, 1]);

    token.cancel();
    handle.await.unwrap();
  }
}
