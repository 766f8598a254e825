use std::sync::{
  Arc, OnceLock, Weak,
  atomic::{AtomicBool, Ordering},
};

use crate::{
  error::FlowError,
  function::Mapper,
  fusion::{FusionMode, FusionRequest, QueueSubscription},
  hooks,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{Subscription, Upstream, set_once},
};

/// Transforms every item. Fusion passes through: a fused subscriber polls the
/// upstream queue through the mapper, and a failing mapper surfaces as an
/// `Err` from `poll`.
pub struct MapOp<S, M> {
  source: S,
  mapper: Arc<M>,
}

impl<S, M> MapOp<S, M> {
  pub fn new(source: S, mapper: M) -> Self { MapOp { source, mapper: Arc::new(mapper) } }
}

impl<S, M> Publisher for MapOp<S, M>
where
  S: Publisher,
  S::Item: Send + 'static,
  M: Mapper<S::Item> + 'static,
  M::Output: Send + 'static,
{
  type Item = M::Output;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<M::Output>>) {
    self
      .source
      .subscribe(MapSubscriber::new(subscriber, self.mapper.clone()))
  }
}

struct MapSubscriber<T, M: Mapper<T>> {
  actual: Arc<dyn Subscriber<M::Output>>,
  mapper: Arc<M>,
  upstream: OnceLock<Upstream<T>>,
  done: AtomicBool,
  me: Weak<Self>,
}

impl<T, M> MapSubscriber<T, M>
where
  T: Send + 'static,
  M: Mapper<T> + 'static,
  M::Output: Send + 'static,
{
  fn new(actual: Arc<dyn Subscriber<M::Output>>, mapper: Arc<M>) -> Arc<Self> {
    Arc::new_cyclic(|me| MapSubscriber {
      actual,
      mapper,
      upstream: OnceLock::new(),
      done: AtomicBool::new(false),
      me: me.clone(),
    })
  }

  fn queue(&self) -> Option<&Arc<dyn QueueSubscription<T>>> { self.upstream.get()?.queue() }
}

impl<T, M> Subscriber<T> for MapSubscriber<T, M>
where
  T: Send + 'static,
  M: Mapper<T> + 'static,
  M::Output: Send + 'static,
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
    match self.mapper.apply(value) {
      Ok(mapped) => self.actual.on_next(mapped),
      Err(err) => {
        self.cancel();
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
    if !self.done.swap(true, Ordering::AcqRel) {
      self.actual.on_complete();
    }
  }

  fn on_available(&self) { self.actual.on_available(); }
}

impl<T, M> Subscription for MapSubscriber<T, M>
where
  T: Send + 'static,
  M: Mapper<T> + 'static,
  M::Output: Send + 'static,
{
  fn request(&self, n: u64) {
    if let Some(upstream) = self.upstream.get() {
      upstream.request(n);
    }
  }

  fn cancel(&self) {
    if let Some(upstream) = self.upstream.get() {
      upstream.cancel();
    }
  }
}

impl<T, M> QueueSubscription<M::Output> for MapSubscriber<T, M>
where
  T: Send + 'static,
  M: Mapper<T> + 'static,
  M::Output: Send + 'static,
{
  fn request_fusion(&self, requested: FusionRequest) -> FusionMode {
    self
      .queue()
      .map_or(FusionMode::None, |queue| queue.request_fusion(requested))
  }

  fn poll(&self) -> Result<Option<M::Output>, FlowError> {
    let Some(queue) = self.queue() else {
      return Ok(None);
    };
    queue.poll()?.map(|value| self.mapper.apply(value)).transpose()
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
  fn maps_pushed_items() {
    let ts = TestSubscriber::new();
    source::range(1, 3).hide().map(|v| v * 10).subscribe(ts.clone());
    ts.assert_values(&[10, 20, 30]).assert_complete();
  }

  #[rxflow_macro::test]
  fn mapper_failure_cancels_upstream() {
    let processor = DirectProcessor::new();
    let ts = TestSubscriber::new();
    processor
      .clone()
      .try_map(|v: i32| if v > 1 { Err(FlowError::msg("too big")) } else { Ok(v) })
      .subscribe(ts.clone());
    processor.on_next(1);
    processor.on_next(2);
    assert!(!processor.has_subscribers());
    ts.assert_values(&[1]).assert_error_message("too big");
  }

  #[rxflow_macro::test]
  fn fused_poll_surfaces_missing_value() {
    let ts = TestSubscriber::fused(FusionRequest::Sync, u64::MAX);
    source::just(1)
      .try_map(|_: i32| -> Result<i32, FlowError> {
        Err(FlowError::NullValue("The mapper returned a null value."))
      })
      .subscribe(ts.clone());
    assert_eq!(ts.fusion_mode(), FusionMode::Sync);
    ts.assert_no_values()
      .assert_error_message("The mapper returned a null value.");
  }
}
