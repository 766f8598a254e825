use std::{marker::PhantomData, sync::Arc};

use crate::{
  error::FlowError,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{EmptySubscription, Upstream},
};

/// Completes right after subscription.
pub fn empty<T>() -> Empty<T> { Empty(PhantomData) }

/// Fails with `err` right after subscription.
pub fn throw_err<T>(err: FlowError) -> ThrowErr<T> { ThrowErr { err, _item: PhantomData } }

/// Never signals anything after `on_subscribe`.
pub fn never<T>() -> Never<T> { Never(PhantomData) }

pub struct Empty<T>(PhantomData<fn() -> T>);

pub struct ThrowErr<T> {
  err: FlowError,
  _item: PhantomData<fn() -> T>,
}

pub struct Never<T>(PhantomData<fn() -> T>);

impl<T> Publisher for Empty<T> {
  type Item = T;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
    subscriber.on_subscribe(Upstream::Push(Arc::new(EmptySubscription)));
    subscriber.on_complete();
  }
}

impl<T> Publisher for ThrowErr<T> {
  type Item = T;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
    subscriber.on_subscribe(Upstream::Push(Arc::new(EmptySubscription)));
    subscriber.on_error(self.err.clone());
  }
}

impl<T> Publisher for Never<T> {
  type Item = T;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
    subscriber.on_subscribe(Upstream::Push(Arc::new(EmptySubscription)));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_subscriber::TestSubscriber;

  #[rxflow_macro::test]
  fn terminal_sources() {
    let ts = TestSubscriber::<()>::with_request(0);
    empty().subscribe(ts.clone());
    ts.assert_no_values().assert_complete();

    let ts = TestSubscriber::<()>::new();
    throw_err(FlowError::msg("boom")).subscribe(ts.clone());
    ts.assert_error_message("boom").assert_not_complete();

    let ts = TestSubscriber::<()>::new();
    never().subscribe(ts.clone());
    ts.assert_no_values().assert_not_complete().assert_no_error();
  }
}
