//! Maps outer items to inner publishers and subscribes to them one at a time.
//!
//! Outer items are prefetched into a bounded queue (or polled from a fused
//! upstream). A single drain loop pops an item once no inner publisher is
//! active, maps it and subscribes. Inner items flow to the downstream through
//! a [`SubscriptionArbiter`], so demand left over by a finished inner is handed
//! to the next one.
//!
//! How errors are surfaced is configured with [`ErrorMode`]:
//!
//! | mode        | inner / mapper error                | outer error                        |
//! |-------------|-------------------------------------|------------------------------------|
//! | `Immediate` | cancel everything, signal now       | cancel the inner, signal now       |
//! | `Boundary`  | stop admitting inners, signal now   | signal when the active inner ends  |
//! | `End`       | keep going, combine at the end      | drain the buffer, combine at end   |

use std::sync::{
  Arc, Mutex, OnceLock, Weak,
  atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering},
};

use crossbeam_queue::{ArrayQueue, SegQueue};
use smallvec::SmallVec;

use crate::{
  arbiter::SubscriptionArbiter,
  config::Config,
  demand::{from_prefetch, validate},
  drain::Wip,
  error::FlowError,
  function::Mapper,
  fusion::{AtomicFusionMode, FusionMode, FusionRequest, QueueSubscription},
  hooks,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{Subscription, Upstream, set_once},
};

/// When an error is signaled relative to the work still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
  #[default]
  Immediate,
  Boundary,
  End,
}

/// Per-operator settings of `concat_map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatMapConfig {
  pub(crate) error_mode: ErrorMode,
  pub(crate) prefetch: usize,
}

impl Default for ConcatMapConfig {
  fn default() -> Self {
    ConcatMapConfig { error_mode: ErrorMode::Immediate, prefetch: Config::xs_buffer_size() }
  }
}

impl ConcatMapConfig {
  pub fn new() -> Self { Self::default() }

  pub fn error_mode(mut self, error_mode: ErrorMode) -> Self {
    self.error_mode = error_mode;
    self
  }

  /// Number of outer items requested ahead. `usize::MAX` requests an
  /// unbounded amount and buffers without limit.
  ///
  /// # Panics
  ///
  /// Panics when `prefetch` is zero.
  pub fn prefetch(mut self, prefetch: usize) -> Self {
    assert!(prefetch > 0, "prefetch must be greater than zero, got {prefetch}");
    self.prefetch = prefetch;
    self
  }
}

pub struct ConcatMapOp<S, M> {
  source: S,
  mapper: Arc<M>,
  config: ConcatMapConfig,
}

impl<S, M> ConcatMapOp<S, M> {
  pub fn new(source: S, mapper: M, config: ConcatMapConfig) -> Self {
    ConcatMapOp { source, mapper: Arc::new(mapper), config }
  }
}

impl<S, M, P> Publisher for ConcatMapOp<S, M>
where
  S: Publisher,
  S::Item: Send + 'static,
  M: Mapper<S::Item, Output = P> + 'static,
  P: Publisher + 'static,
  P::Item: Send + 'static,
{
  type Item = P::Item;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<P::Item>>) {
    self
      .source
      .subscribe(ConcatMapMain::new(subscriber, self.mapper.clone(), self.config))
  }
}

// ==================== error holder ====================

/// Errors recorded for later delivery. `Immediate` and `Boundary` keep a
/// single error, `End` accumulates them in occurrence order.
struct ErrorHolder {
  accumulate: bool,
  present: AtomicBool,
  slot: Mutex<ErrorSlot>,
}

#[derive(Default)]
struct ErrorSlot {
  errors: SmallVec<[FlowError; 1]>,
  terminated: bool,
}

impl ErrorHolder {
  fn new(mode: ErrorMode) -> Self {
    ErrorHolder {
      accumulate: mode == ErrorMode::End,
      present: AtomicBool::new(false),
      slot: Mutex::new(ErrorSlot::default()),
    }
  }

  /// Records `err`. A rejected error goes to the dropped-error hook.
  fn add(&self, err: FlowError) -> bool {
    let rejected = {
      let mut slot = self.slot.lock().unwrap();
      if slot.terminated || (!self.accumulate && !slot.errors.is_empty()) {
        Some(err)
      } else {
        slot.errors.push(err);
        self.present.store(true, Ordering::Release);
        None
      }
    };
    match rejected {
      Some(err) => {
        hooks::on_error_dropped(err);
        false
      }
      None => true,
    }
  }

  fn has_error(&self) -> bool { self.present.load(Ordering::Acquire) }

  /// Closes the holder and returns the combined error, if any. Every later
  /// call returns `None` and every later `add` is rejected.
  fn terminate(&self) -> Option<FlowError> {
    let mut slot = self.slot.lock().unwrap();
    if slot.terminated {
      return None;
    }
    slot.terminated = true;
    self.present.store(false, Ordering::Release);
    if slot.errors.is_empty() {
      None
    } else {
      Some(FlowError::composite(slot.errors.drain(..)))
    }
  }
}

// ==================== pending outer items ====================

enum Pending<T> {
  Bounded(ArrayQueue<T>),
  Unbounded(SegQueue<T>),
  Fused(Arc<dyn QueueSubscription<T>>),
}

impl<T> Pending<T> {
  fn new(prefetch: usize) -> Self {
    if prefetch == usize::MAX {
      Pending::Unbounded(SegQueue::new())
    } else {
      Pending::Bounded(ArrayQueue::new(prefetch))
    }
  }

  fn offer(&self, value: T) -> Result<(), (T, FlowError)> {
    match self {
      Pending::Bounded(queue) => {
        let capacity = queue.capacity();
        queue.push(value).map_err(|value| (value, FlowError::Overflow(capacity)))
      }
      Pending::Unbounded(queue) => {
        queue.push(value);
        Ok(())
      }
      Pending::Fused(_) => Err((value, FlowError::PushOnFused)),
    }
  }

  fn poll(&self) -> Result<Option<T>, FlowError> {
    match self {
      Pending::Bounded(queue) => Ok(queue.pop()),
      Pending::Unbounded(queue) => Ok(queue.pop()),
      Pending::Fused(queue) => queue.poll(),
    }
  }

  fn clear(&self) {
    match self {
      Pending::Bounded(queue) => while queue.pop().is_some() {},
      Pending::Unbounded(queue) => while queue.pop().is_some() {},
      Pending::Fused(queue) => queue.clear(),
    }
  }
}

// ==================== main subscriber ====================

const WAITING_OUTER: u8 = 0;
const INNER_ACTIVE: u8 = 1;
const DONE: u8 = 2;

/// What an inner subscriber reports back. Erases the outer item and mapper
/// types from the inner.
trait InnerParent<R>: Send + Sync {
  fn inner_subscribe(&self, subscription: Arc<dyn Subscription>);

  fn inner_next(&self, value: R);

  fn inner_error(&self, err: FlowError, produced: u64);

  fn inner_complete(&self, produced: u64);
}

struct ConcatMapMain<T, P: Publisher, M> {
  actual: Arc<dyn Subscriber<P::Item>>,
  mapper: Arc<M>,
  mode: ErrorMode,
  prefetch: usize,
  limit: usize,
  upstream: OnceLock<Upstream<T>>,
  queue: OnceLock<Pending<T>>,
  fusion: AtomicFusionMode,
  arbiter: SubscriptionArbiter,
  errors: ErrorHolder,
  wip: Wip,
  // Raised while an inner item is handed downstream. An error that finds it
  // raised is emitted by the thread lowering it.
  guard: AtomicUsize,
  state: AtomicU8,
  // No further outer items will be queued.
  done: AtomicBool,
  cancelled: AtomicBool,
  consumed: AtomicUsize,
  me: Weak<Self>,
}

impl<T, P, M> ConcatMapMain<T, P, M>
where
  T: Send + 'static,
  M: Mapper<T, Output = P> + 'static,
  P: Publisher + 'static,
  P::Item: Send + 'static,
{
  fn new(actual: Arc<dyn Subscriber<P::Item>>, mapper: Arc<M>, config: ConcatMapConfig) -> Arc<Self> {
    let prefetch = config.prefetch;
    let limit = if prefetch == usize::MAX { usize::MAX } else { prefetch - (prefetch >> 2) };
    Arc::new_cyclic(|me| ConcatMapMain {
      actual,
      mapper,
      mode: config.error_mode,
      prefetch,
      limit,
      upstream: OnceLock::new(),
      queue: OnceLock::new(),
      fusion: AtomicFusionMode::default(),
      arbiter: SubscriptionArbiter::new(),
      errors: ErrorHolder::new(config.error_mode),
      wip: Wip::new(),
      guard: AtomicUsize::new(0),
      state: AtomicU8::new(WAITING_OUTER),
      done: AtomicBool::new(false),
      cancelled: AtomicBool::new(false),
      consumed: AtomicUsize::new(0),
      me: me.clone(),
    })
  }

  fn cancel_upstream(&self) {
    if let Some(upstream) = self.upstream.get() {
      upstream.cancel();
    }
  }

  fn is_terminated(&self) -> bool {
    self.cancelled.load(Ordering::Acquire) || self.state.load(Ordering::Acquire) == DONE
  }

  /// The single transition into DONE. Whoever wins it cancels both sides and
  /// owns the terminal signal.
  fn finish(&self) -> bool {
    if self.state.swap(DONE, Ordering::AcqRel) == DONE {
      return false;
    }
    self.arbiter.cancel();
    self.cancel_upstream();
    true
  }

  fn signal_terminal(&self, err: Option<FlowError>) {
    if !self.finish() {
      if let Some(err) = err {
        hooks::on_error_dropped(err);
      }
      return;
    }
    match err {
      Some(err) => self.actual.on_error(err),
      None => self.actual.on_complete(),
    }
  }

  /// Emits the recorded error unless an inner item is being delivered right
  /// now; in that case the delivering thread emits it.
  fn signal_error_now(&self) {
    if self.guard.fetch_add(1, Ordering::AcqRel) == 0
      && let Some(err) = self.errors.terminate()
    {
      self.signal_terminal(Some(err));
    }
  }

  /// Records `err` and terminates without waiting for anything in flight.
  fn fail_now(&self, err: FlowError) {
    self.errors.add(err);
    self.arbiter.cancel();
    self.cancel_upstream();
    self.signal_error_now();
    self.drain();
  }

  fn replenish(&self) {
    if self.fusion.load() == FusionMode::Sync {
      return;
    }
    let consumed = self.consumed.load(Ordering::Relaxed) + 1;
    if consumed == self.limit {
      self.consumed.store(0, Ordering::Relaxed);
      if let Some(upstream) = self.upstream.get() {
        upstream.request(consumed as u64);
      }
    } else {
      self.consumed.store(consumed, Ordering::Relaxed);
    }
  }

  fn subscribe_inner(&self, inner: P) {
    if self
      .state
      .compare_exchange(WAITING_OUTER, INNER_ACTIVE, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return;
    }
    let Some(me) = self.me.upgrade() else {
      return;
    };
    let parent: Arc<dyn InnerParent<P::Item>> = me;
    tracing::trace!("concat_map: subscribing to the next inner publisher");
    inner.subscribe(Arc::new(ConcatMapInner::new(parent)));
  }

  fn mapper_failed(&self, err: FlowError) {
    self.errors.add(err);
    match self.mode {
      ErrorMode::Immediate => {
        self.cancel_upstream();
        self.signal_error_now();
      }
      ErrorMode::Boundary => {
        self.cancel_upstream();
        self.done.store(true, Ordering::Release);
      }
      ErrorMode::End => {}
    }
  }

  // A failed `poll` means the outer source can't go on.
  fn outer_poll_failed(&self, queue: &Pending<T>, err: FlowError) {
    self.errors.add(err);
    self.cancel_upstream();
    match self.mode {
      ErrorMode::Immediate => {
        self.arbiter.cancel();
        self.signal_error_now();
      }
      ErrorMode::Boundary | ErrorMode::End => {
        self.done.store(true, Ordering::Release);
        queue.clear();
      }
    }
  }

  fn drain(&self) {
    if !self.wip.enter() {
      return;
    }
    let mut missed = 1;
    loop {
      if let Some(queue) = self.queue.get() {
        self.drain_queue(queue);
      }
      missed = self.wip.leave(missed);
      if missed == 0 {
        return;
      }
    }
  }

  fn drain_queue(&self, queue: &Pending<T>) {
    loop {
      if self.is_terminated() {
        queue.clear();
        return;
      }
      if self.state.load(Ordering::Acquire) == INNER_ACTIVE {
        return;
      }
      if self.errors.has_error() {
        match self.mode {
          ErrorMode::Immediate => {
            queue.clear();
            self.arbiter.cancel();
            self.signal_error_now();
            return;
          }
          ErrorMode::Boundary => {
            queue.clear();
            if let Some(err) = self.errors.terminate() {
              self.signal_terminal(Some(err));
            }
            return;
          }
          ErrorMode::End => {}
        }
      }

      let done = self.done.load(Ordering::Acquire);
      let item = match queue.poll() {
        Ok(item) => item,
        Err(err) => {
          self.outer_poll_failed(queue, err);
          continue;
        }
      };
      let Some(item) = item else {
        if done {
          self.signal_terminal(self.errors.terminate());
        }
        return;
      };

      self.replenish();
      match self.mapper.apply(item) {
        Ok(inner) => self.subscribe_inner(inner),
        Err(err) => self.mapper_failed(err),
      }
    }
  }
}

impl<T, P, M> Subscriber<T> for ConcatMapMain<T, P, M>
where
  T: Send + 'static,
  M: Mapper<T, Output = P> + 'static,
  P: Publisher + 'static,
  P::Item: Send + 'static,
{
  fn on_subscribe(&self, upstream: Upstream<T>) {
    if !set_once(&self.upstream, upstream.clone()) {
      return;
    }
    let Some(me) = self.me.upgrade() else {
      return;
    };
    if let Some(queue) = upstream.queue() {
      match queue.request_fusion(FusionRequest::Any) {
        FusionMode::Sync => {
          let _ = self.queue.set(Pending::Fused(queue.clone()));
          self.fusion.store(FusionMode::Sync);
          self.done.store(true, Ordering::Release);
          self.actual.on_subscribe(Upstream::Push(me));
          self.drain();
          return;
        }
        FusionMode::Async => {
          let _ = self.queue.set(Pending::Fused(queue.clone()));
          self.fusion.store(FusionMode::Async);
          self.actual.on_subscribe(Upstream::Push(me));
          upstream.request(from_prefetch(self.prefetch));
          return;
        }
        FusionMode::None => {}
      }
    }
    let _ = self.queue.set(Pending::new(self.prefetch));
    self.actual.on_subscribe(Upstream::Push(me));
    upstream.request(from_prefetch(self.prefetch));
  }

  fn on_next(&self, value: T) {
    if self.is_terminated() {
      hooks::on_next_dropped(value);
      return;
    }
    let Some(queue) = self.queue.get() else {
      hooks::on_next_dropped(value);
      return;
    };
    match queue.offer(value) {
      Ok(()) => self.drain(),
      Err((value, err)) => {
        hooks::on_next_dropped(value);
        self.cancel_upstream();
        self.on_error(err);
      }
    }
  }

  fn on_error(&self, err: FlowError) {
    if self.is_terminated() {
      hooks::on_error_dropped(err);
      return;
    }
    if !self.errors.add(err) {
      return;
    }
    match self.mode {
      ErrorMode::Immediate => {
        self.arbiter.cancel();
        self.signal_error_now();
        self.drain();
      }
      ErrorMode::Boundary | ErrorMode::End => {
        self.done.store(true, Ordering::Release);
        self.drain();
      }
    }
  }

  fn on_complete(&self) {
    self.done.store(true, Ordering::Release);
    self.drain();
  }

  fn on_available(&self) { self.drain(); }
}

impl<T, P, M> InnerParent<P::Item> for ConcatMapMain<T, P, M>
where
  T: Send + 'static,
  M: Mapper<T, Output = P> + 'static,
  P: Publisher + 'static,
  P::Item: Send + 'static,
{
  fn inner_subscribe(&self, subscription: Arc<dyn Subscription>) { self.arbiter.set(subscription); }

  fn inner_next(&self, value: P::Item) {
    if self.cancelled.load(Ordering::Acquire) {
      hooks::on_next_dropped(value);
      return;
    }
    if self.guard.load(Ordering::Acquire) == 0
      && self
        .guard
        .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
      self.actual.on_next(value);
      if self
        .guard
        .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
      {
        return;
      }
      if let Some(err) = self.errors.terminate() {
        self.signal_terminal(Some(err));
      }
    } else {
      hooks::on_next_dropped(value);
    }
  }

  fn inner_error(&self, err: FlowError, produced: u64) {
    self.arbiter.produced(produced);
    if self.is_terminated() {
      hooks::on_error_dropped(err);
      return;
    }
    match self.mode {
      ErrorMode::Immediate => {
        if self.errors.add(err) {
          self.cancel_upstream();
          self.signal_error_now();
        }
      }
      ErrorMode::Boundary => {
        if self.errors.add(err) {
          self.cancel_upstream();
          self.done.store(true, Ordering::Release);
        }
        self.inner_finished();
      }
      ErrorMode::End => {
        self.errors.add(err);
        self.inner_finished();
      }
    }
    self.drain();
  }

  fn inner_complete(&self, produced: u64) {
    self.arbiter.produced(produced);
    self.inner_finished();
    self.drain();
  }
}

impl<T, P: Publisher, M> ConcatMapMain<T, P, M> {
  fn inner_finished(&self) {
    let _ = self
      .state
      .compare_exchange(INNER_ACTIVE, WAITING_OUTER, Ordering::AcqRel, Ordering::Acquire);
  }
}

impl<T, P, M> Subscription for ConcatMapMain<T, P, M>
where
  T: Send + 'static,
  M: Mapper<T, Output = P> + 'static,
  P: Publisher + 'static,
  P::Item: Send + 'static,
{
  fn request(&self, n: u64) {
    match validate(n) {
      Ok(n) => self.arbiter.request(n),
      Err(err) => self.fail_now(err),
    }
  }

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    // Taking DONE here keeps a racing terminal signal from reaching the
    // downstream after it cancelled.
    self.finish();
    self.drain();
  }
}

// ==================== inner subscriber ====================

/// Subscribed to exactly one mapped publisher.
struct ConcatMapInner<R> {
  // Taken on the terminal signal so a finished inner no longer keeps the
  // operator alive.
  parent: Mutex<Option<Arc<dyn InnerParent<R>>>>,
  produced: AtomicU64,
}

impl<R> ConcatMapInner<R> {
  fn new(parent: Arc<dyn InnerParent<R>>) -> Self {
    ConcatMapInner { parent: Mutex::new(Some(parent)), produced: AtomicU64::new(0) }
  }

  fn parent(&self) -> Option<Arc<dyn InnerParent<R>>> { self.parent.lock().unwrap().clone() }

  fn take_parent(&self) -> Option<Arc<dyn InnerParent<R>>> { self.parent.lock().unwrap().take() }
}

impl<R: Send + 'static> Subscriber<R> for ConcatMapInner<R> {
  fn on_subscribe(&self, upstream: Upstream<R>) {
    match self.parent() {
      Some(parent) => parent.inner_subscribe(upstream.into_subscription()),
      None => upstream.cancel(),
    }
  }

  fn on_next(&self, value: R) {
    match self.parent() {
      Some(parent) => {
        self.produced.fetch_add(1, Ordering::Relaxed);
        parent.inner_next(value);
      }
      None => hooks::on_next_dropped(value),
    }
  }

  fn on_error(&self, err: FlowError) {
    match self.take_parent() {
      Some(parent) => parent.inner_error(err, self.produced.swap(0, Ordering::Relaxed)),
      None => hooks::on_error_dropped(err),
    }
  }

  fn on_complete(&self) {
    if let Some(parent) = self.take_parent() {
      parent.inner_complete(self.produced.swap(0, Ordering::Relaxed));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{prelude::*, test_subscriber::TestSubscriber};

  #[rxflow_macro::test]
  fn config_defaults() {
    let config = ConcatMapConfig::default();
    assert_eq!(config.error_mode, ErrorMode::Immediate);
    assert_eq!(config.prefetch, Config::xs_buffer_size());
    let config = config.error_mode(ErrorMode::End).prefetch(4);
    assert_eq!((config.error_mode, config.prefetch), (ErrorMode::End, 4));
  }

  #[test]
  #[should_panic(expected = "prefetch must be greater than zero")]
  fn zero_prefetch_is_rejected() { let _ = ConcatMapConfig::new().prefetch(0); }

  #[rxflow_macro::test]
  fn error_holder_single_slot_rejects_second_error() {
    let holder = ErrorHolder::new(ErrorMode::Boundary);
    assert!(holder.add(FlowError::msg("first")));
    assert!(!holder.add(FlowError::msg("second")));
    assert_eq!(holder.terminate().map(|e| e.to_string()), Some("first".into()));
    assert!(holder.terminate().is_none());
    assert!(!holder.add(FlowError::msg("late")));
  }

  #[rxflow_macro::test]
  fn error_holder_accumulates_in_end_mode() {
    let holder = ErrorHolder::new(ErrorMode::End);
    holder.add(FlowError::msg("a"));
    holder.add(FlowError::msg("b"));
    let err = holder.terminate().unwrap();
    assert_eq!(err.causes().len(), 2);
  }

  #[rxflow_macro::test]
  fn concatenates_inner_sequences_in_order() {
    for mode in [ErrorMode::Immediate, ErrorMode::Boundary, ErrorMode::End] {
      let ts = TestSubscriber::new();
      source::range(1, 2)
        .concat_map_with(|v| source::range(v, 2), ConcatMapConfig::new().error_mode(mode))
        .subscribe(ts.clone());
      ts.assert_values(&[1, 2, 2, 3]).assert_complete().assert_no_error();
    }
  }

  #[rxflow_macro::test]
  fn small_prefetch_replenishes_outer() {
    let ts = TestSubscriber::new();
    source::range(1, 100)
      .hide()
      .concat_map_with(source::just, ConcatMapConfig::new().prefetch(1))
      .subscribe(ts.clone());
    assert_eq!(ts.value_count(), 100);
    ts.assert_complete();
  }

  #[rxflow_macro::test]
  fn zero_request_terminates_with_violation() {
    let ts = TestSubscriber::with_request(0);
    source::range(1, 3)
      .concat_map(|v| source::range(v, 2))
      .subscribe(ts.clone());
    ts.request(0);
    ts.assert_no_values()
      .assert_error_message("non-positive request: demand must be greater than zero");
  }

  /// Requests everything up front and keeps no handle on the subscription.
  struct Forgetful(Arc<Mutex<Vec<String>>>);

  impl Subscriber<i32> for Forgetful {
    fn on_subscribe(&self, upstream: Upstream<i32>) { upstream.request(crate::demand::UNBOUNDED); }

    fn on_next(&self, value: i32) { self.0.lock().unwrap().push(format!("next {value}")); }

    fn on_error(&self, err: FlowError) { self.0.lock().unwrap().push(format!("error {err}")); }

    fn on_complete(&self) { self.0.lock().unwrap().push("complete".into()); }
  }

  #[rxflow_macro::test]
  fn active_inner_keeps_operator_alive_without_downstream_handle() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let inner = DirectProcessor::<i32>::new();
    let token = Arc::new(());
    {
      let (inner, token) = (inner.clone(), token.clone());
      source::just(1)
        .concat_map(move |_| {
          let _mapper_alive = &token;
          inner.clone()
        })
        .subscribe(Arc::new(Forgetful(seen.clone())));
    }
    assert!(inner.has_subscribers());
    assert_eq!(Arc::strong_count(&token), 2);

    inner.on_next(5);
    inner.on_complete();
    assert_eq!(*seen.lock().unwrap(), vec!["next 5".to_string(), "complete".to_string()]);
    assert!(!inner.has_subscribers());
    // The finished inner released the operator, and with it the mapper.
    assert_eq!(Arc::strong_count(&token), 1);
  }

  /// Grants ASYNC fusion and never has anything to poll.
  #[derive(Default)]
  struct IdleQueue {
    cancelled: AtomicBool,
  }

  impl Subscription for IdleQueue {
    fn request(&self, _n: u64) {}

    fn cancel(&self) { self.cancelled.store(true, Ordering::SeqCst); }
  }

  impl QueueSubscription<i32> for IdleQueue {
    fn request_fusion(&self, requested: FusionRequest) -> FusionMode {
      if requested.accepts(FusionMode::Async) { FusionMode::Async } else { FusionMode::None }
    }

    fn poll(&self) -> Result<Option<i32>, FlowError> { Ok(None) }

    fn size(&self) -> usize { 0 }

    fn clear(&self) {}
  }

  /// Hands out an `IdleQueue` and remembers its subscriber so items can be
  /// pushed at it by hand.
  #[derive(Default)]
  struct AsyncFusedSource {
    queue: Arc<IdleQueue>,
    subscriber: Mutex<Option<Arc<dyn Subscriber<i32>>>>,
  }

  impl Publisher for AsyncFusedSource {
    type Item = i32;

    fn subscribe(&self, subscriber: Arc<dyn Subscriber<i32>>) {
      *self.subscriber.lock().unwrap() = Some(subscriber.clone());
      subscriber.on_subscribe(Upstream::Fused(self.queue.clone()));
    }
  }

  #[rxflow_macro::test]
  fn push_into_async_fused_outer_is_a_protocol_violation() {
    let outer = Arc::new(AsyncFusedSource::default());
    let ts = TestSubscriber::new();
    outer.clone().concat_map(source::just).subscribe(ts.clone());

    let main = outer.subscriber.lock().unwrap().clone().unwrap();
    main.on_next(7);
    ts.assert_no_values()
      .assert_error_with(|err| matches!(err, FlowError::PushOnFused))
      .assert_error_with(FlowError::is_protocol_violation);
    assert!(outer.queue.cancelled.load(Ordering::SeqCst));
  }
}
