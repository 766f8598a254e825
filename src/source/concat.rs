use std::sync::{
  Arc, Weak,
  atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use crate::{
  arbiter::SubscriptionArbiter,
  demand::validate,
  drain::Wip,
  error::FlowError,
  hooks,
  publisher::{BoxedPublisher, Publisher},
  subscriber::Subscriber,
  subscription::{EmptySubscription, Subscription, Upstream},
};

/// Subscribes to `sources` one after another, each after the previous one
/// completed. The first error terminates the sequence.
pub fn concat<T>(sources: impl IntoIterator<Item = BoxedPublisher<T>>) -> Concat<T> {
  Concat { sources: sources.into_iter().collect() }
}

pub struct Concat<T> {
  sources: Arc<[BoxedPublisher<T>]>,
}

impl<T: Send + 'static> Publisher for Concat<T> {
  type Item = T;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
    if self.sources.is_empty() {
      subscriber.on_subscribe(Upstream::Push(Arc::new(EmptySubscription)));
      subscriber.on_complete();
      return;
    }
    let parent = Arc::new_cyclic(|me| ConcatSubscriber {
      actual: subscriber,
      sources: self.sources.clone(),
      index: AtomicUsize::new(0),
      arbiter: SubscriptionArbiter::new(),
      wip: Wip::new(),
      produced: AtomicU64::new(0),
      done: AtomicBool::new(false),
      me: me.clone(),
    });
    parent.actual.on_subscribe(Upstream::Push(parent.clone()));
    parent.next_source();
  }
}

struct ConcatSubscriber<T> {
  actual: Arc<dyn Subscriber<T>>,
  sources: Arc<[BoxedPublisher<T>]>,
  index: AtomicUsize,
  arbiter: SubscriptionArbiter,
  wip: Wip,
  produced: AtomicU64,
  done: AtomicBool,
  me: Weak<Self>,
}

impl<T: Send + 'static> ConcatSubscriber<T> {
  fn next_source(&self) {
    if !self.wip.enter() {
      return;
    }
    let Some(me) = self.me.upgrade() else {
      return;
    };
    loop {
      if self.arbiter.is_cancelled() {
        return;
      }
      let index = self.index.load(Ordering::Acquire);
      let Some(source) = self.sources.get(index) else {
        if !self.done.swap(true, Ordering::AcqRel) {
          self.actual.on_complete();
        }
        return;
      };
      self.arbiter.produced(self.produced.swap(0, Ordering::Relaxed));
      self.index.store(index + 1, Ordering::Release);
      source.subscribe(me.clone());
      if self.wip.leave(1) == 0 {
        return;
      }
    }
  }
}

impl<T: Send + 'static> Subscriber<T> for ConcatSubscriber<T> {
  fn on_subscribe(&self, upstream: Upstream<T>) { self.arbiter.set(upstream.into_subscription()); }

  fn on_next(&self, value: T) {
    if self.done.load(Ordering::Acquire) {
      hooks::on_next_dropped(value);
      return;
    }
    self.produced.fetch_add(1, Ordering::Relaxed);
    self.actual.on_next(value);
  }

  fn on_error(&self, err: FlowError) {
    if self.done.swap(true, Ordering::AcqRel) {
      hooks::on_error_dropped(err);
      return;
    }
    self.actual.on_error(err);
  }

  fn on_complete(&self) { self.next_source(); }
}

impl<T: Send + 'static> Subscription for ConcatSubscriber<T> {
  fn request(&self, n: u64) {
    match validate(n) {
      Ok(n) => self.arbiter.request(n),
      Err(err) => {
        self.arbiter.cancel();
        self.on_error(err);
      }
    }
  }

  fn cancel(&self) { self.arbiter.cancel(); }
}
