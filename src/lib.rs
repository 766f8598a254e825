//! # rxflow: backpressured reactive streams
//!
//! Publishers push items to subscribers only as far as the subscribers asked
//! for them. Operators keep their state behind atomics and a single drain loop
//! each, so every signal may arrive from any thread.
//!
//! ## Quick Start
//!
//! ```rust
//! use rxflow::{prelude::*, test_subscriber::TestSubscriber};
//!
//! let ts = TestSubscriber::new();
//! source::range(1, 3)
//!   .concat_map(|v| source::range(v * 10, 2))
//!   .filter(|v| v % 20 != 1)
//!   .subscribe(ts.clone());
//! ts.assert_values(&[10, 11, 20, 30, 31]).assert_complete();
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Publisher`] | A source; `subscribe` starts a sequence |
//! | [`Subscriber`] | Receives `on_subscribe`, `on_next`, then one terminal signal |
//! | [`Subscription`] | `request(n)` demand and `cancel()` |
//! | [`QueueSubscription`] | Queue view of an upstream, negotiated through fusion |
//! | [`PublisherExt`] | The operators: `filter`, `map`, `retry`, `concat_map`, ... |
//!
//! ## Configuration
//!
//! The default `concat_map` prefetch comes from the `RXFLOW_BUFFER_SIZE_XS`
//! environment variable, see [`config`]. Errors
//! that cannot be delivered anymore are reported through [`hooks`], which log
//! with `tracing` unless replaced.
//!
//! [`Publisher`]: publisher::Publisher
//! [`PublisherExt`]: publisher::PublisherExt
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription
//! [`QueueSubscription`]: fusion::QueueSubscription

pub mod arbiter;
pub mod config;
pub mod demand;
pub mod drain;
pub mod error;
pub mod function;
pub mod fusion;
pub mod hooks;
pub mod ops;
pub mod prelude;
pub mod processor;
pub mod publisher;
pub mod source;
pub mod subscriber;
pub mod subscription;
pub mod test_subscriber;

pub use prelude::*;
