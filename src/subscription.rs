//! The demand/cancellation channel between a publisher and its subscriber.

use std::sync::{Arc, OnceLock};

use crate::{error::FlowError, fusion::QueueSubscription, hooks};

/// Control handle a subscriber uses to pull items and to stop the flow.
///
/// Both methods may be called from any thread, concurrently with signals
/// still travelling downstream.
pub trait Subscription: Send + Sync {
  /// Adds `n` to the outstanding demand. `n == 0` is a protocol violation and
  /// is answered with [`FlowError::NonPositiveRequest`] on the error channel.
  fn request(&self, n: u64);

  /// Stops the flow. Idempotent; signals already in flight may still land
  /// and are absorbed by the receiving side.
  fn cancel(&self);
}

/// What a subscriber receives in `on_subscribe`: a plain subscription, or one
/// that also offers a queue view. The capability is resolved once, here.
pub enum Upstream<T> {
  Push(Arc<dyn Subscription>),
  Fused(Arc<dyn QueueSubscription<T>>),
}

impl<T> Upstream<T> {
  #[inline]
  pub fn request(&self, n: u64) {
    match self {
      Upstream::Push(s) => s.request(n),
      Upstream::Fused(q) => q.request(n),
    }
  }

  #[inline]
  pub fn cancel(&self) {
    match self {
      Upstream::Push(s) => s.cancel(),
      Upstream::Fused(q) => q.cancel(),
    }
  }

  /// The queue view, if the upstream offers one.
  pub fn queue(&self) -> Option<&Arc<dyn QueueSubscription<T>>> {
    match self {
      Upstream::Push(_) => None,
      Upstream::Fused(q) => Some(q),
    }
  }

  /// The plain subscription, dropping any queue capability.
  pub fn into_subscription(self) -> Arc<dyn Subscription>
  where
    T: 'static,
  {
    match self {
      Upstream::Push(s) => s,
      Upstream::Fused(q) => q,
    }
  }
}

impl<T> Clone for Upstream<T> {
  fn clone(&self) -> Self {
    match self {
      Upstream::Push(s) => Upstream::Push(s.clone()),
      Upstream::Fused(q) => Upstream::Fused(q.clone()),
    }
  }
}

/// Stores the upstream handed to `on_subscribe`.
///
/// A second upstream is cancelled on the spot and reported as
/// [`FlowError::DuplicateSubscription`]; `false` is returned in that case.
pub fn set_once<T>(slot: &OnceLock<Upstream<T>>, upstream: Upstream<T>) -> bool {
  match slot.set(upstream) {
    Ok(()) => true,
    Err(duplicate) => {
      duplicate.cancel();
      hooks::on_error_dropped(FlowError::DuplicateSubscription);
      false
    }
  }
}

/// A subscription with nothing behind it, handed out by sources that
/// terminate right away.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
  fn request(&self, _n: u64) {}

  fn cancel(&self) {}
}
