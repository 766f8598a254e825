//! Fusion: consuming an upstream through a queue view instead of `on_next`.
//!
//! A fuseable upstream hands its subscriber `Upstream::Fused`. The subscriber
//! may then negotiate once, before requesting anything:
//!
//! - [`FusionMode::Sync`]: every item is already available. `poll` until it
//!   returns `Ok(None)`, which *is* completion. No `on_complete` follows and
//!   `request` must not be called.
//! - [`FusionMode::Async`]: items arrive concurrently. `Ok(None)` only means
//!   "nothing right now"; the upstream calls `on_available` when more is
//!   queued and still terminates through `on_complete` / `on_error`.
//! - [`FusionMode::None`]: the upstream declined; use `request` + `on_next`.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::{error::FlowError, subscription::Subscription};

/// Mode granted by a fuseable upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusionMode {
  #[default]
  None,
  Sync,
  Async,
}

/// Modes a subscriber is able to honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionRequest {
  Sync,
  Async,
  Any,
}

impl FusionRequest {
  /// Whether a subscriber that asked for `self` can work in `mode`.
  pub fn accepts(self, mode: FusionMode) -> bool {
    match (self, mode) {
      (_, FusionMode::None) => true,
      (FusionRequest::Any, _) => true,
      (FusionRequest::Sync, FusionMode::Sync) => true,
      (FusionRequest::Async, FusionMode::Async) => true,
      _ => false,
    }
  }
}

/// Queue view of an upstream.
///
/// `poll` returns `Ok(None)` as the explicit EMPTY marker. `Err` means the
/// next value could not be produced (a user function failed or a value was
/// missing); pollers surface it as an error, they never skip it.
pub trait QueueSubscription<T>: Subscription {
  /// Negotiates the fusion mode. Called at most once, before any `request`.
  fn request_fusion(&self, requested: FusionRequest) -> FusionMode;

  fn poll(&self) -> Result<Option<T>, FlowError>;

  /// Number of queued items. Best effort, exact only in SYNC mode.
  fn size(&self) -> usize;

  fn is_empty(&self) -> bool { self.size() == 0 }

  /// Drops everything queued. Used when tearing down after a cancel.
  fn clear(&self);
}

/// A [`FusionMode`] slot readable from any thread.
#[derive(Debug, Default)]
pub struct AtomicFusionMode(AtomicU8);

impl AtomicFusionMode {
  pub fn new(mode: FusionMode) -> Self { Self(AtomicU8::new(mode as u8)) }

  pub fn load(&self) -> FusionMode {
    match self.0.load(Ordering::Acquire) {
      1 => FusionMode::Sync,
      2 => FusionMode::Async,
      _ => FusionMode::None,
    }
  }

  pub fn store(&self, mode: FusionMode) { self.0.store(mode as u8, Ordering::Release) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[rxflow_macro::test]
  fn request_acceptance() {
    assert!(FusionRequest::Any.accepts(FusionMode::Sync));
    assert!(FusionRequest::Any.accepts(FusionMode::Async));
    assert!(FusionRequest::Sync.accepts(FusionMode::None));
    assert!(!FusionRequest::Sync.accepts(FusionMode::Async));
    assert!(!FusionRequest::Async.accepts(FusionMode::Sync));
  }

  #[rxflow_macro::test]
  fn atomic_mode_round_trips() {
    let mode = AtomicFusionMode::default();
    assert_eq!(mode.load(), FusionMode::None);
    mode.store(FusionMode::Async);
    assert_eq!(mode.load(), FusionMode::Async);
  }
}
