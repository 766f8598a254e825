use std::sync::Arc;

use crate::{error::FlowError, publisher::Publisher, subscriber::Subscriber, subscription::Upstream};

/// Passes every signal through but never offers a queue view downstream, so
/// the operators below it always run in push mode.
pub struct HideOp<S> {
  source: S,
}

impl<S> HideOp<S> {
  pub fn new(source: S) -> Self { HideOp { source } }
}

impl<S> Publisher for HideOp<S>
where
  S: Publisher,
  S::Item: Send + 'static,
{
  type Item = S::Item;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<S::Item>>) {
    self.source.subscribe(Arc::new(HideSubscriber(subscriber)))
  }
}

struct HideSubscriber<T>(Arc<dyn Subscriber<T>>);

impl<T: Send + 'static> Subscriber<T> for HideSubscriber<T> {
  fn on_subscribe(&self, upstream: Upstream<T>) {
    self.0.on_subscribe(Upstream::Push(upstream.into_subscription()))
  }

  fn on_next(&self, value: T) { self.0.on_next(value) }

  fn on_error(&self, err: FlowError) { self.0.on_error(err) }

  fn on_complete(&self) { self.0.on_complete() }
}

#[cfg(test)]
mod tests {
  use crate::{prelude::*, test_subscriber::TestSubscriber};

  #[rxflow_macro::test]
  fn fusion_is_refused_behind_hide() {
    let ts = TestSubscriber::fused(FusionRequest::Any, u64::MAX);
    source::range(1, 3).hide().subscribe(ts.clone());
    assert_eq!(ts.fusion_mode(), FusionMode::None);
    ts.assert_values(&[1, 2, 3]).assert_complete();
  }
}
