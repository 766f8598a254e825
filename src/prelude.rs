//! Prelude module for convenient imports

pub use crate::{
  error::FlowError,
  fusion::{FusionMode, FusionRequest, QueueSubscription},
  ops::concat_map::{ConcatMapConfig, ErrorMode},
  processor::{DirectProcessor, UnicastProcessor},
  publisher::{BoxedPublisher, Publisher, PublisherExt},
  source,
  subscriber::{LambdaSubscriber, Subscriber},
  subscription::{Subscription, Upstream},
};
