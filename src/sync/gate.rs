//! Refresh admission: cooldown between manual refreshes, one fetch at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Rejection;

/// What asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
  /// User action. Starts the cooldown.
  Manual,
  /// Auto-refresh timer. Checked against the cooldown, does not start it.
  Automatic,
  /// Session start with a cold or stale cache. Ignores the cooldown.
  Initial,
  /// "Clear cache and refetch". Ignores the cooldown, then starts it.
  Forced,
}

impl RefreshTrigger {
  fn checks_cooldown(self) -> bool {
    matches!(self, RefreshTrigger::Manual | RefreshTrigger::Automatic)
  }

  fn starts_cooldown(self) -> bool {
    matches!(self, RefreshTrigger::Manual | RefreshTrigger::Forced)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
  Ready,
  CoolingDown { remaining: Duration },
}

#[derive(Debug, Default)]
struct GateInner {
  last_manual: Option<Instant>,
  in_flight: bool,
}

/// Decides whether a refresh may start.
///
/// The cooldown is purely time based, so a fetch that never returns cannot
/// hold the gate shut past its own timeout.
#[derive(Debug)]
pub struct RefreshGate {
  cooldown: Duration,
  inner: Mutex<GateInner>,
}

impl RefreshGate {
  pub fn new(cooldown: Duration) -> Arc<Self> {
    Arc::new(Self {
      cooldown,
      inner: Mutex::new(GateInner::default()),
    })
  }

  pub fn cooldown(&self) -> Duration {
    self.cooldown
  }

  fn lock(&self) -> MutexGuard<'_, GateInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn remaining(&self, inner: &GateInner, now: Instant) -> Option<Duration> {
    let last = inner.last_manual?;
    let elapsed = now.saturating_duration_since(last);
    (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
  }

  pub fn state(&self) -> GateState {
    self.state_at(Instant::now())
  }

  pub fn state_at(&self, now: Instant) -> GateState {
    match self.remaining(&self.lock(), now) {
      Some(remaining) => GateState::CoolingDown { remaining },
      None => GateState::Ready,
    }
  }

  pub fn is_in_flight(&self) -> bool {
    self.lock().in_flight
  }

  pub fn try_admit(self: &Arc<Self>, trigger: RefreshTrigger) -> Result<RefreshPermit, Rejection> {
    self.try_admit_at(trigger, Instant::now())
  }

  /// Admit or reject a refresh at `now`. The permit marks the refresh as in
  /// flight until it is dropped.
  pub fn try_admit_at(
    self: &Arc<Self>,
    trigger: RefreshTrigger,
    now: Instant,
  ) -> Result<RefreshPermit, Rejection> {
    let mut inner = self.lock();

    if inner.in_flight {
      debug!(?trigger, "refresh rejected, another is in flight");
      return Err(Rejection::InFlight);
    }
    if trigger.checks_cooldown() {
      if let Some(remaining) = self.remaining(&inner, now) {
        debug!(?trigger, ?remaining, "refresh rejected, cooling down");
        return Err(Rejection::CoolingDown { remaining });
      }
    }

    inner.in_flight = true;
    if trigger.starts_cooldown() {
      inner.last_manual = Some(now);
    }
    debug!(?trigger, "refresh admitted");

    Ok(RefreshPermit {
      gate: Arc::clone(self),
    })
  }
}

/// Held for the duration of an admitted refresh.
#[derive(Debug)]
pub struct RefreshPermit {
  gate: Arc<RefreshGate>,
}

impl Drop for RefreshPermit {
  fn drop(&mut self) {
    self.gate.lock().in_flight = false;
  }
}
