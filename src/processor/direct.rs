use std::sync::{
  Arc, Mutex, MutexGuard, Weak,
  atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::{
  demand::{Demand, UNBOUNDED, validate},
  error::FlowError,
  hooks,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{EmptySubscription, Subscription, Upstream},
};

/// A hot source broadcasting to every current subscriber.
///
/// Nothing is buffered: a subscriber without outstanding demand when an item
/// arrives is cut off with [`FlowError::LackOfRequests`]. Subscribers joining
/// after termination receive the terminal signal right away.
pub struct DirectProcessor<T> {
  inner: Arc<DirectInner<T>>,
}

impl<T> Clone for DirectProcessor<T> {
  fn clone(&self) -> Self { DirectProcessor { inner: self.inner.clone() } }
}

struct DirectInner<T> {
  state: Mutex<DirectState<T>>,
  next_id: AtomicUsize,
}

struct DirectState<T> {
  subscribers: Vec<Arc<DirectSubscription<T>>>,
  // `Some(None)` once completed, `Some(Some(err))` once failed.
  terminal: Option<Option<FlowError>>,
}

impl<T> Default for DirectProcessor<T> {
  fn default() -> Self {
    DirectProcessor {
      inner: Arc::new(DirectInner {
        state: Mutex::new(DirectState { subscribers: Vec::new(), terminal: None }),
        next_id: AtomicUsize::new(0),
      }),
    }
  }
}

impl<T: Clone + Send + 'static> DirectProcessor<T> {
  pub fn new() -> Self { Self::default() }

  pub fn has_subscribers(&self) -> bool { !self.inner.state().subscribers.is_empty() }

  pub fn subscriber_count(&self) -> usize { self.inner.state().subscribers.len() }

  pub fn is_terminated(&self) -> bool { self.inner.state().terminal.is_some() }

  pub fn on_next(&self, value: T) {
    let subscribers = {
      let state = self.inner.state();
      if state.terminal.is_some() {
        drop(state);
        hooks::on_next_dropped(value);
        return;
      }
      state.subscribers.clone()
    };
    for subscriber in subscribers {
      subscriber.deliver(value.clone());
    }
  }

  pub fn on_error(&self, err: FlowError) {
    let Some(subscribers) = self.inner.terminate(Some(err.clone())) else {
      hooks::on_error_dropped(err);
      return;
    };
    for subscriber in subscribers {
      subscriber.error(err.clone());
    }
  }

  pub fn on_complete(&self) {
    if let Some(subscribers) = self.inner.terminate(None) {
      for subscriber in subscribers {
        subscriber.complete();
      }
    }
  }
}

impl<T> DirectInner<T> {
  fn state(&self) -> MutexGuard<'_, DirectState<T>> { self.state.lock().unwrap() }

  /// Records the terminal signal and hands back the subscribers to notify.
  /// `None` when already terminated.
  fn terminate(&self, err: Option<FlowError>) -> Option<Vec<Arc<DirectSubscription<T>>>> {
    let mut state = self.state();
    if state.terminal.is_some() {
      return None;
    }
    state.terminal = Some(err);
    Some(std::mem::take(&mut state.subscribers))
  }

  fn remove(&self, id: usize) { self.state().subscribers.retain(|s| s.id != id); }
}

impl<T: Clone + Send + 'static> Publisher for DirectProcessor<T> {
  type Item = T;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
    let subscription = Arc::new(DirectSubscription {
      id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
      actual: subscriber.clone(),
      requested: Demand::new(),
      detached: AtomicBool::new(false),
      parent: Arc::downgrade(&self.inner),
    });
    subscriber.on_subscribe(Upstream::Push(subscription.clone()));

    let terminal = {
      let mut state = self.inner.state();
      match &state.terminal {
        Some(terminal) => Some(terminal.clone()),
        None => {
          if !subscription.detached.load(Ordering::Acquire) {
            state.subscribers.push(subscription.clone());
          }
          None
        }
      }
    };
    match terminal {
      Some(Some(err)) => subscription.error(err),
      Some(None) => subscription.complete(),
      None => {}
    }
  }
}

/// Lets the processor consume another publisher. The upstream is asked for
/// an unbounded amount.
impl<T: Clone + Send + 'static> Subscriber<T> for DirectProcessor<T> {
  fn on_subscribe(&self, upstream: Upstream<T>) {
    if self.is_terminated() {
      upstream.cancel();
    } else {
      upstream.request(UNBOUNDED);
    }
  }

  fn on_next(&self, value: T) { DirectProcessor::on_next(self, value) }

  fn on_error(&self, err: FlowError) { DirectProcessor::on_error(self, err) }

  fn on_complete(&self) { DirectProcessor::on_complete(self) }
}

struct DirectSubscription<T> {
  id: usize,
  actual: Arc<dyn Subscriber<T>>,
  requested: Demand,
  // Set once the subscriber was cancelled or received a terminal signal.
  detached: AtomicBool,
  parent: Weak<DirectInner<T>>,
}

impl<T> DirectSubscription<T> {
  fn detach(&self) -> bool {
    if self.detached.swap(true, Ordering::AcqRel) {
      return false;
    }
    if let Some(parent) = self.parent.upgrade() {
      parent.remove(self.id);
    }
    true
  }

  fn deliver(&self, value: T) {
    if self.detached.load(Ordering::Acquire) {
      return;
    }
    if self.requested.get() != 0 {
      self.actual.on_next(value);
      self.requested.produced(1);
    } else if self.detach() {
      self.actual.on_error(FlowError::LackOfRequests);
    }
  }

  fn error(&self, err: FlowError) {
    if self.detach() {
      self.actual.on_error(err);
    }
  }

  fn complete(&self) {
    if self.detach() {
      self.actual.on_complete();
    }
  }
}

impl<T: Send + 'static> Subscription for DirectSubscription<T> {
  fn request(&self, n: u64) {
    match validate(n) {
      Ok(n) => {
        self.requested.add(n);
      }
      Err(err) => {
        if self.detach() {
          self.actual.on_error(err);
        }
      }
    }
  }

  fn cancel(&self) { self.detach(); }
}
