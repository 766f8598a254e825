use std::{
  iter::Peekable,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
};

use crate::{
  demand::{Demand, validate},
  error::FlowError,
  fusion::{FusionMode, FusionRequest, QueueSubscription},
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{EmptySubscription, Subscription, Upstream},
};

/// Emits the items of `iterable`. Every subscription iterates a fresh clone.
pub fn from_iter<I>(iterable: I) -> FromIter<I>
where
  I: IntoIterator,
{
  FromIter(iterable)
}

/// Emits `value` and completes.
pub fn just<T>(value: T) -> FromIter<[T; 1]> { FromIter([value]) }

#[derive(Clone)]
pub struct FromIter<I>(I);

impl<I> Publisher for FromIter<I>
where
  I: IntoIterator + Clone + Send + Sync,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
{
  type Item = I::Item;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<I::Item>>) {
    let mut iter = self.0.clone().into_iter().peekable();
    if iter.peek().is_none() {
      subscriber.on_subscribe(Upstream::Push(Arc::new(EmptySubscription)));
      subscriber.on_complete();
      return;
    }
    let subscription = Arc::new(IterSubscription {
      actual: Mutex::new(Some(subscriber.clone())),
      iter: Mutex::new(iter),
      requested: Demand::new(),
      cancelled: AtomicBool::new(false),
    });
    subscriber.on_subscribe(Upstream::Fused(subscription));
  }
}

struct IterSubscription<It: Iterator> {
  actual: Mutex<Option<Arc<dyn Subscriber<It::Item>>>>,
  iter: Mutex<Peekable<It>>,
  requested: Demand,
  cancelled: AtomicBool,
}

impl<It> IterSubscription<It>
where
  It: Iterator + Send + 'static,
  It::Item: Send + 'static,
{
  fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }

  fn next(&self) -> Option<It::Item> { self.iter.lock().unwrap().next() }

  fn exhausted(&self) -> bool { self.iter.lock().unwrap().peek().is_none() }

  fn complete(&self) {
    if let Some(actual) = self.actual.lock().unwrap().take() {
      actual.on_complete();
    }
  }

  fn emit(&self, actual: &dyn Subscriber<It::Item>, mut requested: u64) {
    let mut emitted = 0;
    loop {
      while emitted != requested {
        if self.is_cancelled() {
          return;
        }
        let Some(value) = self.next() else {
          self.complete();
          return;
        };
        actual.on_next(value);
        emitted += 1;
        if self.is_cancelled() {
          return;
        }
        if self.exhausted() {
          self.complete();
          return;
        }
      }
      requested = self.requested.get();
      if requested == emitted {
        requested = self.requested.produced(emitted);
        if requested == 0 {
          return;
        }
        emitted = 0;
      }
    }
  }
}

impl<It> Subscription for IterSubscription<It>
where
  It: Iterator + Send + 'static,
  It::Item: Send + 'static,
{
  fn request(&self, n: u64) {
    let n = match validate(n) {
      Ok(n) => n,
      Err(err) => {
        self.cancelled.store(true, Ordering::Release);
        if let Some(actual) = self.actual.lock().unwrap().take() {
          actual.on_error(err);
        }
        return;
      }
    };
    if self.requested.add(n) != 0 {
      return;
    }
    let actual = self.actual.lock().unwrap().clone();
    if let Some(actual) = actual {
      self.emit(actual.as_ref(), n);
    }
  }

  fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      self.actual.lock().unwrap().take();
    }
  }
}

impl<It> QueueSubscription<It::Item> for IterSubscription<It>
where
  It: Iterator + Send + 'static,
  It::Item: Send + 'static,
{
  fn request_fusion(&self, requested: FusionRequest) -> FusionMode {
    if !requested.accepts(FusionMode::Sync) {
      return FusionMode::None;
    }
    // A SYNC-fused subscriber polls; it never hears from this side again.
    self.actual.lock().unwrap().take();
    FusionMode::Sync
  }

  fn poll(&self) -> Result<Option<It::Item>, FlowError> {
    if self.is_cancelled() {
      return Ok(None);
    }
    Ok(self.next())
  }

  fn size(&self) -> usize { self.iter.lock().unwrap().size_hint().0 }

  fn clear(&self) { self.cancelled.store(true, Ordering::Release); }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_subscriber::TestSubscriber;

  #[rxflow_macro::test]
  fn completes_right_after_the_last_item() {
    let ts = TestSubscriber::with_request(3);
    from_iter(vec!["a", "b", "c"]).subscribe(ts.clone());
    ts.assert_values(&["a", "b", "c"]).assert_complete();
  }

  #[rxflow_macro::test]
  fn every_subscription_starts_over() {
    let source = from_iter(1..4);
    let first = TestSubscriber::new();
    let second = TestSubscriber::new();
    source.subscribe(first.clone());
    source.subscribe(second.clone());
    first.assert_values(&[1, 2, 3]);
    second.assert_values(&[1, 2, 3]);
  }

  #[rxflow_macro::test]
  fn just_emits_once() {
    let ts = TestSubscriber::with_request(1);
    just(42).subscribe(ts.clone());
    ts.assert_values(&[42]).assert_complete();
  }

  #[rxflow_macro::test]
  fn empty_iterable_completes_without_demand() {
    let ts = TestSubscriber::<i32>::with_request(0);
    from_iter(Vec::new()).subscribe(ts.clone());
    ts.assert_complete();
  }

  #[rxflow_macro::test]
  fn fused_poll_drains_the_iterator() {
    let ts = TestSubscriber::fused(FusionRequest::Any, 0);
    from_iter(vec![1, 2]).subscribe(ts.clone());
    assert_eq!(ts.fusion_mode(), FusionMode::Sync);
    ts.assert_values(&[1, 2]).assert_complete();
  }
}
