use std::sync::{
  Arc, Mutex, Weak,
  atomic::{AtomicBool, Ordering},
};

use crossbeam_queue::SegQueue;

use crate::{
  demand::{Demand, UNBOUNDED, validate},
  drain::Wip,
  error::FlowError,
  fusion::{AtomicFusionMode, FusionMode, FusionRequest, QueueSubscription},
  hooks,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{EmptySubscription, Subscription, Upstream},
};

/// A hot source for exactly one subscriber. Items pushed before the
/// subscriber arrives, or beyond its demand, are buffered without bound.
///
/// Offers ASYNC fusion: a fused subscriber is told through `on_available`
/// that items were queued and polls them itself.
pub struct UnicastProcessor<T> {
  inner: Arc<UnicastInner<T>>,
}

impl<T> Clone for UnicastProcessor<T> {
  fn clone(&self) -> Self { UnicastProcessor { inner: self.inner.clone() } }
}

struct UnicastInner<T> {
  queue: SegQueue<T>,
  // Released on termination so the subscriber chain can be dropped.
  actual: Mutex<Option<Arc<dyn Subscriber<T>>>>,
  subscribed: AtomicBool,
  requested: Demand,
  wip: Wip,
  done: AtomicBool,
  error: Mutex<Option<FlowError>>,
  cancelled: AtomicBool,
  mode: AtomicFusionMode,
  me: Weak<Self>,
}

impl<T: Send + 'static> Default for UnicastProcessor<T> {
  fn default() -> Self { Self::new() }
}

impl<T: Send + 'static> UnicastProcessor<T> {
  pub fn new() -> Self {
    let inner = Arc::new_cyclic(|me| UnicastInner {
      queue: SegQueue::new(),
      actual: Mutex::new(None),
      subscribed: AtomicBool::new(false),
      requested: Demand::new(),
      wip: Wip::new(),
      done: AtomicBool::new(false),
      error: Mutex::new(None),
      cancelled: AtomicBool::new(false),
      mode: AtomicFusionMode::default(),
      me: me.clone(),
    });
    UnicastProcessor { inner }
  }

  pub fn has_subscriber(&self) -> bool {
    self.inner.subscribed.load(Ordering::Acquire) && !self.inner.cancelled.load(Ordering::Acquire)
  }

  /// Number of buffered items.
  pub fn len(&self) -> usize { self.inner.queue.len() }

  pub fn is_empty(&self) -> bool { self.inner.queue.is_empty() }

  pub fn on_next(&self, value: T) {
    let inner = &self.inner;
    if inner.done.load(Ordering::Acquire) || inner.cancelled.load(Ordering::Acquire) {
      hooks::on_next_dropped(value);
      return;
    }
    inner.queue.push(value);
    inner.drain();
  }

  pub fn on_error(&self, err: FlowError) {
    let inner = &self.inner;
    if inner.done.load(Ordering::Acquire) || inner.cancelled.load(Ordering::Acquire) {
      hooks::on_error_dropped(err);
      return;
    }
    *inner.error.lock().unwrap() = Some(err);
    inner.done.store(true, Ordering::Release);
    inner.drain();
  }

  pub fn on_complete(&self) {
    let inner = &self.inner;
    if inner.done.load(Ordering::Acquire) || inner.cancelled.load(Ordering::Acquire) {
      return;
    }
    inner.done.store(true, Ordering::Release);
    inner.drain();
  }
}

impl<T: Send + 'static> UnicastInner<T> {
  fn actual(&self) -> Option<Arc<dyn Subscriber<T>>> { self.actual.lock().unwrap().clone() }

  fn clear(&self) { while self.queue.pop().is_some() {} }

  fn drain(&self) {
    if !self.wip.enter() {
      return;
    }
    let mut missed = 1;
    loop {
      if let Some(actual) = self.actual() {
        let finished = if self.mode.load() == FusionMode::Async {
          self.drain_fused(actual.as_ref())
        } else {
          self.drain_regular(actual.as_ref())
        };
        if finished {
          return;
        }
      } else if self.cancelled.load(Ordering::Acquire) {
        self.clear();
      }
      missed = self.wip.leave(missed);
      if missed == 0 {
        return;
      }
    }
  }

  fn drain_regular(&self, actual: &dyn Subscriber<T>) -> bool {
    let requested = self.requested.get();
    let mut emitted = 0;
    while emitted != requested {
      let done = self.done.load(Ordering::Acquire);
      let value = self.queue.pop();
      if self.check_terminated(done, value.is_none(), actual) {
        return true;
      }
      let Some(value) = value else {
        break;
      };
      actual.on_next(value);
      emitted += 1;
    }
    if emitted == requested
      && self.check_terminated(self.done.load(Ordering::Acquire), self.queue.is_empty(), actual)
    {
      return true;
    }
    if emitted != 0 && requested != UNBOUNDED {
      self.requested.produced(emitted);
    }
    false
  }

  fn drain_fused(&self, actual: &dyn Subscriber<T>) -> bool {
    if self.cancelled.load(Ordering::Acquire) {
      self.clear();
      self.actual.lock().unwrap().take();
      return true;
    }
    let done = self.done.load(Ordering::Acquire);
    actual.on_available();
    if done {
      self.terminate(actual);
      return true;
    }
    false
  }

  fn check_terminated(&self, done: bool, empty: bool, actual: &dyn Subscriber<T>) -> bool {
    if self.cancelled.load(Ordering::Acquire) {
      self.clear();
      self.actual.lock().unwrap().take();
      return true;
    }
    if done && empty {
      self.terminate(actual);
      return true;
    }
    false
  }

  fn terminate(&self, actual: &dyn Subscriber<T>) {
    self.actual.lock().unwrap().take();
    let err = self.error.lock().unwrap().take();
    match err {
      Some(err) => actual.on_error(err),
      None => actual.on_complete(),
    }
  }
}

impl<T: Send + 'static> Publisher for UnicastProcessor<T> {
  type Item = T;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
    let inner = &self.inner;
    if inner.subscribed.swap(true, Ordering::AcqRel) {
      subscriber.on_subscribe(Upstream::Push(Arc::new(EmptySubscription)));
      subscriber.on_error(FlowError::msg("UnicastProcessor allows only a single subscriber"));
      return;
    }
    let Some(me) = inner.me.upgrade() else {
      return;
    };
    subscriber.on_subscribe(Upstream::Fused(me));
    *inner.actual.lock().unwrap() = Some(subscriber);
    if inner.cancelled.load(Ordering::Acquire) {
      inner.actual.lock().unwrap().take();
    }
    inner.drain();
  }
}

/// Lets the processor consume another publisher. The upstream is asked for
/// an unbounded amount.
impl<T: Send + 'static> Subscriber<T> for UnicastProcessor<T> {
  fn on_subscribe(&self, upstream: Upstream<T>) {
    if self.inner.done.load(Ordering::Acquire) || self.inner.cancelled.load(Ordering::Acquire) {
      upstream.cancel();
    } else {
      upstream.request(UNBOUNDED);
    }
  }

  fn on_next(&self, value: T) { UnicastProcessor::on_next(self, value) }

  fn on_error(&self, err: FlowError) { UnicastProcessor::on_error(self, err) }

  fn on_complete(&self) { UnicastProcessor::on_complete(self) }
}

impl<T: Send + 'static> Subscription for UnicastInner<T> {
  fn request(&self, n: u64) {
    match validate(n) {
      Ok(n) => {
        self.requested.add(n);
      }
      Err(err) => {
        let mut error = self.error.lock().unwrap();
        if self.done.load(Ordering::Acquire) {
          drop(error);
          hooks::on_error_dropped(err);
          return;
        }
        *error = Some(err);
        drop(error);
        self.clear();
        self.done.store(true, Ordering::Release);
      }
    }
    self.drain();
  }

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    self.drain();
  }
}

impl<T: Send + 'static> QueueSubscription<T> for UnicastInner<T> {
  fn request_fusion(&self, requested: FusionRequest) -> FusionMode {
    if requested.accepts(FusionMode::Async) {
      self.mode.store(FusionMode::Async);
      FusionMode::Async
    } else {
      FusionMode::None
    }
  }

  fn poll(&self) -> Result<Option<T>, FlowError> { Ok(self.queue.pop()) }

  fn size(&self) -> usize { self.queue.len() }

  fn clear(&self) { UnicastInner::clear(self) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_subscriber::TestSubscriber;

  #[rxflow_macro::test]
  fn buffers_until_subscribed_and_requested() {
    let processor = UnicastProcessor::new();
    processor.on_next(1);
    processor.on_next(2);
    processor.on_next(3);
    processor.on_complete();
    assert_eq!(processor.len(), 3);

    let ts = TestSubscriber::with_request(2);
    processor.subscribe(ts.clone());
    ts.assert_values(&[1, 2]).assert_not_complete();
    ts.request(1);
    ts.assert_values(&[1, 2, 3]).assert_complete();
  }

  #[rxflow_macro::test]
  fn second_subscriber_is_rejected() {
    let processor = UnicastProcessor::<i32>::new();
    processor.subscribe(TestSubscriber::new());
    let late = TestSubscriber::new();
    processor.subscribe(late.clone());
    late.assert_error_message("UnicastProcessor allows only a single subscriber");
  }

  #[rxflow_macro::test]
  fn async_fusion_signals_availability() {
    let processor = UnicastProcessor::new();
    let ts = TestSubscriber::fused(FusionRequest::Async, 0);
    processor.subscribe(ts.clone());
    assert_eq!(ts.fusion_mode(), FusionMode::Async);
    processor.on_next("a");
    processor.on_next("b");
    processor.on_error(FlowError::msg("late failure"));
    ts.assert_values(&["a", "b"]).assert_error_message("late failure");
  }

  #[rxflow_macro::test]
  fn cancel_drops_the_buffer() {
    let processor = UnicastProcessor::new();
    let ts = TestSubscriber::with_request(0);
    processor.subscribe(ts.clone());
    processor.on_next(1);
    ts.cancel();
    assert!(processor.is_empty());
    assert!(!processor.has_subscriber());
    processor.on_next(2);
    assert!(processor.is_empty());
  }
}
