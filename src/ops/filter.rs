use std::sync::{
  Arc, OnceLock, Weak,
  atomic::{AtomicBool, Ordering},
};

use crate::{
  error::FlowError,
  function::Predicate,
  fusion::{AtomicFusionMode, FusionMode, FusionRequest, QueueSubscription},
  hooks,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{Subscription, Upstream, set_once},
};

/// Emits only the items that pass a predicate.
///
/// ```rust
/// use rxflow::{prelude::*, test_subscriber::TestSubscriber};
///
/// let ts = TestSubscriber::with_request(2);
/// source::range(1, 10).filter(|v| v % 2 == 0).subscribe(ts.clone());
/// ts.assert_values(&[2, 4]).assert_not_complete();
///
/// ts.request(10);
/// ts.assert_values(&[2, 4, 6, 8, 10]).assert_complete();
/// ```
pub struct FilterOp<S, P> {
  source: S,
  predicate: Arc<P>,
}

impl<S, P> FilterOp<S, P> {
  pub fn new(source: S, predicate: P) -> Self { FilterOp { source, predicate: Arc::new(predicate) } }
}

impl<S, P> Publisher for FilterOp<S, P>
where
  S: Publisher,
  S::Item: Send + 'static,
  P: Predicate<S::Item> + 'static,
{
  type Item = S::Item;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<S::Item>>) {
    self
      .source
      .subscribe(FilterSubscriber::new(subscriber, self.predicate.clone()))
  }
}

struct FilterSubscriber<T, P> {
  actual: Arc<dyn Subscriber<T>>,
  predicate: Arc<P>,
  upstream: OnceLock<Upstream<T>>,
  mode: AtomicFusionMode,
  done: AtomicBool,
  me: Weak<Self>,
}

impl<T, P> FilterSubscriber<T, P>
where
  T: Send + 'static,
  P: Predicate<T> + 'static,
{
  fn new(actual: Arc<dyn Subscriber<T>>, predicate: Arc<P>) -> Arc<Self> {
    Arc::new_cyclic(|me| FilterSubscriber {
      actual,
      predicate,
      upstream: OnceLock::new(),
      mode: AtomicFusionMode::default(),
      done: AtomicBool::new(false),
      me: me.clone(),
    })
  }

  fn upstream(&self) -> Option<&Upstream<T>> { self.upstream.get() }

  fn queue(&self) -> Option<&Arc<dyn QueueSubscription<T>>> { self.upstream()?.queue() }

  fn poll_sync(&self, queue: &dyn QueueSubscription<T>) -> Result<Option<T>, FlowError> {
    loop {
      let Some(value) = queue.poll()? else {
        return Ok(None);
      };
      if self.predicate.test(&value)? {
        return Ok(Some(value));
      }
    }
  }

  // Items dropped here were requested by the operator, not by downstream.
  fn poll_async(&self, queue: &dyn QueueSubscription<T>) -> Result<Option<T>, FlowError> {
    let mut dropped = 0;
    let polled = loop {
      let value = match queue.poll() {
        Ok(Some(value)) => value,
        other => break other,
      };
      match self.predicate.test(&value) {
        Ok(true) => break Ok(Some(value)),
        Ok(false) => dropped += 1,
        Err(err) => break Err(err),
      }
    };
    if dropped != 0 {
      queue.request(dropped);
    }
    polled
  }
}

impl<T, P> Subscriber<T> for FilterSubscriber<T, P>
where
  T: Send + 'static,
  P: Predicate<T> + 'static,
{
  fn on_subscribe(&self, upstream: Upstream<T>) {
    let fused = upstream.queue().is_some();
    if !set_once(&self.upstream, upstream) {
      return;
    }
    let Some(me) = self.me.upgrade() else {
      return;
    };
    if fused {
      self.actual.on_subscribe(Upstream::Fused(me));
    } else {
      self.actual.on_subscribe(Upstream::Push(me));
    }
  }

  fn on_next(&self, value: T) {
    if self.done.load(Ordering::Acquire) {
      hooks::on_next_dropped(value);
      return;
    }
    match self.predicate.test(&value) {
      Ok(true) => self.actual.on_next(value),
      Ok(false) => {
        if let Some(upstream) = self.upstream() {
          upstream.request(1);
        }
      }
      Err(err) => {
        if let Some(upstream) = self.upstream() {
          upstream.cancel();
        }
        self.on_error(err);
      }
    }
  }

  fn on_error(&self, err: FlowError) {
    if self.done.swap(true, Ordering::AcqRel) {
      hooks::on_error_dropped(err);
      return;
    }
    self.actual.on_error(err);
  }

  fn on_complete(&self) {
    if self.done.swap(true, Ordering::AcqRel) {
      return;
    }
    self.actual.on_complete();
  }

  fn on_available(&self) { self.actual.on_available(); }
}

impl<T, P> Subscription for FilterSubscriber<T, P>
where
  T: Send + 'static,
  P: Predicate<T> + 'static,
{
  fn request(&self, n: u64) {
    if let Some(upstream) = self.upstream() {
      upstream.request(n);
    }
  }

  fn cancel(&self) {
    if let Some(upstream) = self.upstream() {
      upstream.cancel();
    }
  }
}

impl<T, P> QueueSubscription<T> for FilterSubscriber<T, P>
where
  T: Send + 'static,
  P: Predicate<T> + 'static,
{
  fn request_fusion(&self, requested: FusionRequest) -> FusionMode {
    let mode = self
      .queue()
      .map_or(FusionMode::None, |queue| queue.request_fusion(requested));
    self.mode.store(mode);
    mode
  }

  fn poll(&self) -> Result<Option<T>, FlowError> {
    let Some(queue) = self.queue() else {
      return Ok(None);
    };
    match self.mode.load() {
      FusionMode::Sync => self.poll_sync(queue.as_ref()),
      _ => self.poll_async(queue.as_ref()),
    }
  }

  fn size(&self) -> usize { self.queue().map_or(0, |queue| queue.size()) }

  fn clear(&self) {
    if let Some(queue) = self.queue() {
      queue.clear();
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::{prelude::*, test_subscriber::TestSubscriber};

  #[rxflow_macro::test]
  fn emits_passing_items_in_order() {
    let ts = TestSubscriber::new();
    source::range(1, 10).filter(|v| v % 2 == 0).subscribe(ts.clone());
    ts.assert_values(&[2, 4, 6, 8, 10]).assert_complete().assert_no_error();
  }

  #[rxflow_macro::test]
  fn rejected_items_do_not_consume_demand() {
    let ts = TestSubscriber::with_request(2);
    source::range(1, 10).hide().filter(|v| v % 2 == 0).subscribe(ts.clone());
    ts.assert_values(&[2, 4]).assert_not_complete();

    ts.request(10);
    ts.assert_values(&[2, 4, 6, 8, 10]).assert_complete();
  }

  #[rxflow_macro::test]
  fn predicate_failure_cancels_and_terminates() {
    let ts = TestSubscriber::new();
    source::range(1, 10)
      .hide()
      .try_filter(|_| Err(FlowError::msg("forced failure")))
      .subscribe(ts.clone());
    ts.assert_no_values()
      .assert_not_complete()
      .assert_error_message("forced failure");
  }

  #[rxflow_macro::test]
  fn sync_fusion_filters_while_polling() {
    let ts = TestSubscriber::fused(FusionRequest::Any, u64::MAX);
    source::range(1, 10).filter(|v| v % 2 == 0).subscribe(ts.clone());
    assert_eq!(ts.fusion_mode(), FusionMode::Sync);
    ts.assert_values(&[2, 4, 6, 8, 10]).assert_complete();
  }

  #[rxflow_macro::test]
  fn sync_fused_predicate_failure_surfaces_as_error() {
    let ts = TestSubscriber::fused(FusionRequest::Any, u64::MAX);
    source::range(1, 10)
      .try_filter(|v| if *v == 3 { Err(FlowError::msg("forced failure")) } else { Ok(true) })
      .subscribe(ts.clone());
    ts.assert_values(&[1, 2]).assert_error_message("forced failure");
  }

  #[rxflow_macro::test]
  fn async_fusion_filters_queued_items() {
    let processor = UnicastProcessor::new();
    let ts = TestSubscriber::fused(FusionRequest::Any, u64::MAX);
    processor.clone().filter(|v: &i32| v % 2 == 0).subscribe(ts.clone());
    assert_eq!(ts.fusion_mode(), FusionMode::Async);

    for v in 1..=10 {
      processor.on_next(v);
    }
    processor.on_complete();
    ts.assert_values(&[2, 4, 6, 8, 10]).assert_complete();
  }
}
