//! A recording subscriber for tests.
//!
//! ```rust
//! use rxflow::{prelude::*, test_subscriber::TestSubscriber};
//!
//! let ts = TestSubscriber::with_request(1);
//! source::range(1, 3).subscribe(ts.clone());
//! ts.assert_values(&[1]).assert_not_complete();
//! ts.request(5);
//! ts.assert_values(&[1, 2, 3]).assert_complete().assert_no_error();
//! ```
//!
//! The assertions panic with a description of what was recorded, so they are
//! meant for test code only.

use std::{
  fmt::Debug,
  sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock},
  time::{Duration, Instant},
};

use crate::{
  demand::UNBOUNDED,
  drain::Wip,
  error::FlowError,
  fusion::{AtomicFusionMode, FusionMode, FusionRequest, QueueSubscription},
  subscriber::Subscriber,
  subscription::{Upstream, set_once},
};

pub struct TestSubscriber<T> {
  initial_request: u64,
  fusion: Option<FusionRequest>,
  upstream: OnceLock<Upstream<T>>,
  mode: AtomicFusionMode,
  wip: Wip,
  record: Mutex<Record<T>>,
  terminated: Condvar,
}

struct Record<T> {
  values: Vec<T>,
  errors: Vec<FlowError>,
  completions: usize,
  // Signals of any kind that arrived after a terminal one.
  late: usize,
}

impl<T> Record<T> {
  fn is_terminated(&self) -> bool { self.completions > 0 || !self.errors.is_empty() }

  fn count_late(&mut self) {
    if self.is_terminated() {
      self.late += 1;
    }
  }
}

impl<T: Send + 'static> TestSubscriber<T> {
  /// Requests an unbounded amount on subscription.
  pub fn new() -> Arc<Self> { Self::build(UNBOUNDED, None) }

  /// Requests `n` on subscription; `0` requests nothing.
  pub fn with_request(n: u64) -> Arc<Self> { Self::build(n, None) }

  /// Asks a fuseable upstream for `fusion` and requests `n` unless SYNC
  /// fusion was granted.
  pub fn fused(fusion: FusionRequest, n: u64) -> Arc<Self> { Self::build(n, Some(fusion)) }

  fn build(initial_request: u64, fusion: Option<FusionRequest>) -> Arc<Self> {
    Arc::new(TestSubscriber {
      initial_request,
      fusion,
      upstream: OnceLock::new(),
      mode: AtomicFusionMode::default(),
      wip: Wip::new(),
      record: Mutex::new(Record { values: Vec::new(), errors: Vec::new(), completions: 0, late: 0 }),
      terminated: Condvar::new(),
    })
  }

  /// Issues `request(n)` upstream as is, including invalid amounts.
  pub fn request(&self, n: u64) {
    if let Some(upstream) = self.upstream.get() {
      upstream.request(n);
    }
  }

  pub fn cancel(&self) {
    if let Some(upstream) = self.upstream.get() {
      upstream.cancel();
    }
  }

  fn queue(&self) -> Option<&Arc<dyn QueueSubscription<T>>> { self.upstream.get()?.queue() }

  fn drain_sync(&self, queue: &dyn QueueSubscription<T>) {
    loop {
      match queue.poll() {
        Ok(Some(value)) => self.record().values.push(value),
        Ok(None) => {
          self.on_complete();
          return;
        }
        Err(err) => {
          queue.cancel();
          self.on_error(err);
          return;
        }
      }
    }
  }

  fn drain_async(&self) {
    if !self.wip.enter() {
      return;
    }
    let mut missed = 1;
    loop {
      if let Some(queue) = self.queue() {
        loop {
          match queue.poll() {
            Ok(Some(value)) => self.record().values.push(value),
            Ok(None) => break,
            Err(err) => {
              queue.cancel();
              self.on_error(err);
              break;
            }
          }
        }
      }
      missed = self.wip.leave(missed);
      if missed == 0 {
        return;
      }
    }
  }
}

impl<T> TestSubscriber<T> {
  fn record(&self) -> MutexGuard<'_, Record<T>> { self.record.lock().unwrap() }

  pub fn fusion_mode(&self) -> FusionMode { self.mode.load() }

  pub fn values(&self) -> Vec<T>
  where
    T: Clone,
  {
    self.record().values.clone()
  }

  pub fn value_count(&self) -> usize { self.record().values.len() }

  pub fn errors(&self) -> Vec<FlowError> { self.record().errors.clone() }

  pub fn completion_count(&self) -> usize { self.record().completions }

  pub fn is_terminated(&self) -> bool { self.record().is_terminated() }

  /// Blocks until a terminal signal arrived. Returns `false` on timeout.
  pub fn await_terminal(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut record = self.record();
    while !record.is_terminated() {
      let now = Instant::now();
      if now >= deadline {
        return false;
      }
      record = self.terminated.wait_timeout(record, deadline - now).unwrap().0;
    }
    true
  }

  #[track_caller]
  pub fn assert_values(&self, expected: &[T]) -> &Self
  where
    T: PartialEq + Debug,
  {
    let record = self.record();
    assert_eq!(record.values.as_slice(), expected, "unexpected values");
    drop(record);
    self
  }

  #[track_caller]
  pub fn assert_no_values(&self) -> &Self
  where
    T: Debug,
  {
    let record = self.record();
    assert!(record.values.is_empty(), "expected no values, got {:?}", record.values);
    drop(record);
    self
  }

  #[track_caller]
  pub fn assert_complete(&self) -> &Self {
    let record = self.record();
    assert_eq!(record.completions, 1, "expected exactly one completion, errors: {:?}", record.errors);
    drop(record);
    self
  }

  #[track_caller]
  pub fn assert_not_complete(&self) -> &Self {
    let completions = self.completion_count();
    assert_eq!(completions, 0, "expected no completion");
    self
  }

  #[track_caller]
  pub fn assert_no_error(&self) -> &Self {
    let errors = self.errors();
    assert!(errors.is_empty(), "expected no error, got {errors:?}");
    self
  }

  /// Checks that exactly one error and no completion arrived, and that the
  /// error displays as `message`.
  #[track_caller]
  pub fn assert_error_message(&self, message: &str) -> &Self {
    let record = self.record();
    assert_eq!(record.completions, 0, "expected an error, got a completion");
    match record.errors.as_slice() {
      [err] => assert_eq!(err.to_string(), message, "unexpected error"),
      errors => panic!("expected exactly one error, got {errors:?}"),
    }
    drop(record);
    self
  }

  /// Checks that nothing followed the first terminal signal.
  #[track_caller]
  pub fn assert_nothing_after_terminal(&self) -> &Self {
    let late = self.record().late;
    assert_eq!(late, 0, "{late} signal(s) arrived after the terminal signal");
    self
  }

  /// Checks that exactly one error arrived and `check` accepts it.
  #[track_caller]
  pub fn assert_error_with(&self, check: impl FnOnce(&FlowError) -> bool) -> &Self {
    let errors = self.errors();
    match errors.as_slice() {
      [err] => assert!(check(err), "error rejected: {err:?}"),
      errors => panic!("expected exactly one error, got {errors:?}"),
    }
    self
  }
}

impl<T: Send + 'static> Subscriber<T> for TestSubscriber<T> {
  fn on_subscribe(&self, upstream: Upstream<T>) {
    if !set_once(&self.upstream, upstream.clone()) {
      return;
    }
    if let (Some(fusion), Some(queue)) = (self.fusion, upstream.queue()) {
      let mode = queue.request_fusion(fusion);
      self.mode.store(mode);
      match mode {
        FusionMode::Sync => {
          self.drain_sync(queue.as_ref());
          return;
        }
        FusionMode::Async => {
          if self.initial_request != 0 {
            queue.request(self.initial_request);
          }
          self.drain_async();
          return;
        }
        FusionMode::None => {}
      }
    }
    if self.initial_request != 0 {
      upstream.request(self.initial_request);
    }
  }

  fn on_next(&self, value: T) {
    let mut record = self.record();
    record.count_late();
    record.values.push(value);
  }

  fn on_error(&self, err: FlowError) {
    let mut record = self.record();
    record.count_late();
    record.errors.push(err);
    drop(record);
    self.terminated.notify_all();
  }

  fn on_complete(&self) {
    let mut record = self.record();
    record.count_late();
    record.completions += 1;
    drop(record);
    self.terminated.notify_all();
  }

  fn on_available(&self) { self.drain_async(); }
}
