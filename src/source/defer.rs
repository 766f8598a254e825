use std::sync::Arc;

use crate::{publisher::Publisher, subscriber::Subscriber};

/// Builds a fresh publisher for every subscriber.
pub fn defer<F, P>(factory: F) -> Defer<F>
where
  F: Fn() -> P + Send + Sync,
  P: Publisher,
{
  Defer(factory)
}

pub struct Defer<F>(F);

impl<F, P> Publisher for Defer<F>
where
  F: Fn() -> P + Send + Sync,
  P: Publisher,
{
  type Item = P::Item;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<P::Item>>) { (self.0)().subscribe(subscriber) }
}
