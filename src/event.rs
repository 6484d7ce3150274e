use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Rejection;
use crate::sync::RefreshOutcome;

/// Events produced by background sync tasks
#[derive(Debug, Clone)]
pub enum SyncEvent {
  /// A refresh finished and the store was updated
  Refreshed(RefreshOutcome),
  /// A refresh was not admitted
  Rejected(Rejection),
  /// A refresh was admitted but the fetch failed
  Failed(String),
  /// Time left before a manual refresh is allowed again
  Countdown(Duration),
  /// Manual refresh is available
  Ready,
}

pub type EventSender = mpsc::UnboundedSender<SyncEvent>;

/// Collects events from the auto-refresh and countdown tasks
pub struct EventHandler {
  tx: EventSender,
  rx: mpsc::UnboundedReceiver<SyncEvent>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Sender to hand to a background task
  pub fn sender(&self) -> EventSender {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<SyncEvent> {
    self.rx.recv().await
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}
