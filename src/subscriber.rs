//! Subscriber trait and the closure-backed subscriber.

use std::sync::{
  Mutex,
  atomic::{AtomicBool, Ordering},
};

use crate::{
  demand::UNBOUNDED,
  error::FlowError,
  hooks,
  subscription::Upstream,
};

/// Consumer side of the protocol.
///
/// A publisher calls `on_subscribe` exactly once, then `on_next` as many times
/// as demand allows, then at most one of `on_error` / `on_complete`. The
/// methods take `&self` because a subscriber is shared with the publisher and
/// operators keep their mutable state behind atomics and drain guards.
pub trait Subscriber<T>: Send + Sync {
  fn on_subscribe(&self, upstream: Upstream<T>);

  fn on_next(&self, value: T);

  fn on_error(&self, err: FlowError);

  fn on_complete(&self);

  /// ASYNC-fused upstreams call this instead of `on_next` when items were
  /// queued. Subscribers that never request fusion can ignore it.
  fn on_available(&self) {}
}

type NextFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(FlowError) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// A subscriber made of closures. It requests an unbounded amount as soon as
/// it is subscribed.
///
/// ```rust
/// use std::sync::{Arc, Mutex};
///
/// use rxflow::prelude::*;
///
/// let seen = Arc::new(Mutex::new(vec![]));
/// let sink = seen.clone();
/// source::range(1, 10)
///   .filter(|v| v % 2 == 0)
///   .subscribe_next(move |v| sink.lock().unwrap().push(v));
/// assert_eq!(*seen.lock().unwrap(), vec![2, 4, 6, 8, 10]);
/// ```
pub struct LambdaSubscriber<T> {
  next: NextFn<T>,
  error: Option<ErrorFn>,
  complete: Option<CompleteFn>,
  // Released on termination, which breaks the cycle through the operators
  // holding this subscriber.
  upstream: Mutex<Option<Upstream<T>>>,
  subscribed: AtomicBool,
  done: AtomicBool,
}

impl<T: Send + 'static> LambdaSubscriber<T> {
  pub fn new(next: impl Fn(T) + Send + Sync + 'static) -> Self {
    LambdaSubscriber {
      next: Box::new(next),
      error: None,
      complete: None,
      upstream: Mutex::new(None),
      subscribed: AtomicBool::new(false),
      done: AtomicBool::new(false),
    }
  }

  /// Handles the terminal error. Without one, errors go to the dropped-error
  /// hook.
  pub fn with_error(mut self, error: impl Fn(FlowError) + Send + Sync + 'static) -> Self {
    self.error = Some(Box::new(error));
    self
  }

  pub fn with_complete(mut self, complete: impl Fn() + Send + Sync + 'static) -> Self {
    self.complete = Some(Box::new(complete));
    self
  }

  /// Cancels the upstream and ignores anything still in flight.
  pub fn dispose(&self) {
    if self.done.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(upstream) = self.release() {
      upstream.cancel();
    }
  }

  pub fn is_disposed(&self) -> bool { self.done.load(Ordering::Acquire) }

  fn release(&self) -> Option<Upstream<T>> { self.upstream.lock().unwrap().take() }
}

impl<T: Send + 'static> Subscriber<T> for LambdaSubscriber<T> {
  fn on_subscribe(&self, upstream: Upstream<T>) {
    let mut slot = self.upstream.lock().unwrap();
    if self.subscribed.swap(true, Ordering::AcqRel) {
      drop(slot);
      upstream.cancel();
      hooks::on_error_dropped(FlowError::DuplicateSubscription);
      return;
    }
    // `dispose` raises `done` before it takes the slot.
    if self.done.load(Ordering::Acquire) {
      drop(slot);
      upstream.cancel();
      return;
    }
    *slot = Some(upstream.clone());
    drop(slot);
    upstream.request(UNBOUNDED);
  }

  fn on_next(&self, value: T) {
    if self.done.load(Ordering::Acquire) {
      hooks::on_next_dropped(value);
      return;
    }
    (self.next)(value);
  }

  fn on_error(&self, err: FlowError) {
    if self.done.swap(true, Ordering::AcqRel) {
      hooks::on_error_dropped(err);
      return;
    }
    self.release();
    match &self.error {
      Some(error) => error(err),
      None => hooks::on_error_dropped(err),
    }
  }

  fn on_complete(&self) {
    if self.done.swap(true, Ordering::AcqRel) {
      return;
    }
    self.release();
    if let Some(complete) = &self.complete {
      complete();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, atomic::AtomicUsize};

  use super::*;
  use crate::subscription::Subscription;

  #[derive(Default)]
  struct Probe {
    requested: AtomicUsize,
    cancelled: AtomicBool,
  }

  impl Subscription for Probe {
    fn request(&self, _n: u64) { self.requested.fetch_add(1, Ordering::SeqCst); }

    fn cancel(&self) { self.cancelled.store(true, Ordering::SeqCst); }
  }

  #[rxflow_macro::test]
  fn requests_unbounded_and_forwards_signals() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let completed = Arc::new(AtomicBool::new(false));
    let subscriber = {
      let seen = seen.clone();
      let completed = completed.clone();
      LambdaSubscriber::new(move |v: i32| seen.lock().unwrap().push(v))
        .with_complete(move || completed.store(true, Ordering::SeqCst))
    };
    let probe = Arc::new(Probe::default());
    subscriber.on_subscribe(Upstream::Push(probe.clone()));
    subscriber.on_next(1);
    subscriber.on_next(2);
    subscriber.on_complete();
    subscriber.on_next(3);

    assert_eq!(probe.requested.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    assert!(completed.load(Ordering::SeqCst));
  }

  #[rxflow_macro::test]
  fn dispose_before_subscribe_cancels_on_arrival() {
    let subscriber = LambdaSubscriber::new(|_: i32| {});
    subscriber.dispose();
    let probe = Arc::new(Probe::default());
    subscriber.on_subscribe(Upstream::Push(probe.clone()));
    assert!(probe.cancelled.load(Ordering::SeqCst));
    assert_eq!(probe.requested.load(Ordering::SeqCst), 0);
  }

  #[rxflow_macro::test]
  fn termination_releases_the_upstream() {
    let subscriber = LambdaSubscriber::new(|_: i32| {});
    let probe = Arc::new(Probe::default());
    subscriber.on_subscribe(Upstream::Push(probe.clone()));
    assert_eq!(Arc::strong_count(&probe), 2);
    subscriber.on_error(FlowError::msg("boom"));
    assert_eq!(Arc::strong_count(&probe), 1);
    subscriber.dispose();
    assert!(!probe.cancelled.load(Ordering::SeqCst));
  }
}
