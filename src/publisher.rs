//! The `Publisher` trait and the operator surface built on top of it.

use std::sync::Arc;

use crate::{
  error::FlowError,
  function::{Fallible, Infallible},
  ops::{
    concat_map::{ConcatMapConfig, ConcatMapOp, ErrorMode},
    filter::FilterOp,
    hide::HideOp,
    map::MapOp,
    retry::RetryOp,
  },
  subscriber::{LambdaSubscriber, Subscriber},
};

/// A source of a backpressured sequence of items.
///
/// `subscribe` may be called any number of times; every call starts an
/// independent sequence (cold sources) or attaches to a shared one (hot
/// sources such as processors).
pub trait Publisher: Send + Sync {
  type Item;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<Self::Item>>);
}

pub type BoxedPublisher<T> = Arc<dyn Publisher<Item = T>>;

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
  type Item = P::Item;

  #[inline]
  fn subscribe(&self, subscriber: Arc<dyn Subscriber<Self::Item>>) { (**self).subscribe(subscriber) }
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
  type Item = P::Item;

  #[inline]
  fn subscribe(&self, subscriber: Arc<dyn Subscriber<Self::Item>>) { (**self).subscribe(subscriber) }
}

/// Operators available on every publisher.
pub trait PublisherExt: Publisher + Sized {
  /// Emits only the items passing `predicate`. Rejected items are replaced by
  /// a `request(1)` upstream, so downstream demand counts emitted items.
  fn filter<F>(self, predicate: F) -> FilterOp<Self, Infallible<F>>
  where
    F: Fn(&Self::Item) -> bool + Send + Sync,
  {
    FilterOp::new(self, Infallible(predicate))
  }

  /// Like [`PublisherExt::filter`]; an `Err` from the predicate cancels the
  /// upstream and terminates the sequence with that error.
  fn try_filter<F>(self, predicate: F) -> FilterOp<Self, Fallible<F>>
  where
    F: Fn(&Self::Item) -> Result<bool, FlowError> + Send + Sync,
  {
    FilterOp::new(self, Fallible(predicate))
  }

  fn map<F, R>(self, mapper: F) -> MapOp<Self, Infallible<F>>
  where
    F: Fn(Self::Item) -> R + Send + Sync,
  {
    MapOp::new(self, Infallible(mapper))
  }

  fn try_map<F, R>(self, mapper: F) -> MapOp<Self, Fallible<F>>
  where
    F: Fn(Self::Item) -> Result<R, FlowError> + Send + Sync,
  {
    MapOp::new(self, Fallible(mapper))
  }

  /// Resubscribes to this publisher whenever it fails with an error accepted
  /// by `predicate`. Outstanding demand carries over to the new subscription.
  fn retry<F>(self, predicate: F) -> RetryOp<Self, Infallible<F>>
  where
    F: Fn(&FlowError) -> bool + Send + Sync,
  {
    RetryOp::new(self, Infallible(predicate))
  }

  fn try_retry<F>(self, predicate: F) -> RetryOp<Self, Fallible<F>>
  where
    F: Fn(&FlowError) -> Result<bool, FlowError> + Send + Sync,
  {
    RetryOp::new(self, Fallible(predicate))
  }

  /// Maps every item to a publisher and emits their items one publisher
  /// after another. Errors are signaled immediately.
  fn concat_map<F, P>(self, mapper: F) -> ConcatMapOp<Self, Infallible<F>>
  where
    F: Fn(Self::Item) -> P + Send + Sync,
    P: Publisher,
  {
    ConcatMapOp::new(self, Infallible(mapper), ConcatMapConfig::default())
  }

  /// [`PublisherExt::concat_map`] with a mapper that may fail. A mapper error
  /// is handled like an error of the mapped publisher.
  fn try_concat_map<F, P>(self, mapper: F) -> ConcatMapOp<Self, Fallible<F>>
  where
    F: Fn(Self::Item) -> Result<P, FlowError> + Send + Sync,
    P: Publisher,
  {
    ConcatMapOp::new(self, Fallible(mapper), ConcatMapConfig::default())
  }

  /// [`PublisherExt::concat_map`] that lets the running inner publisher finish
  /// before an error is signaled.
  fn concat_map_delay_error<F, P>(self, mapper: F) -> ConcatMapOp<Self, Infallible<F>>
  where
    F: Fn(Self::Item) -> P + Send + Sync,
    P: Publisher,
  {
    let config = ConcatMapConfig::default().error_mode(ErrorMode::Boundary);
    ConcatMapOp::new(self, Infallible(mapper), config)
  }

  fn concat_map_with<F, P>(self, mapper: F, config: ConcatMapConfig) -> ConcatMapOp<Self, Infallible<F>>
  where
    F: Fn(Self::Item) -> P + Send + Sync,
    P: Publisher,
  {
    ConcatMapOp::new(self, Infallible(mapper), config)
  }

  /// Hides the fusion capability of this publisher from its subscribers.
  fn hide(self) -> HideOp<Self> { HideOp::new(self) }

  /// Subscribes with an unbounded closure consumer and returns it, so the
  /// caller can `dispose` it later.
  fn subscribe_next<F>(self, next: F) -> Arc<LambdaSubscriber<Self::Item>>
  where
    F: Fn(Self::Item) + Send + Sync + 'static,
    Self::Item: Send + 'static,
  {
    let subscriber = Arc::new(LambdaSubscriber::new(next));
    self.subscribe(subscriber.clone());
    subscriber
  }

  fn boxed(self) -> BoxedPublisher<Self::Item>
  where
    Self: 'static,
  {
    Arc::new(self)
  }
}

impl<P: Publisher> PublisherExt for P {}
