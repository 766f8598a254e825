//! The error type carried by every `on_error` signal.
//!
//! Protocol violations, user-function failures and source failures all travel
//! through the same terminal channel, so they share one type. Payloads are
//! reference counted which keeps `FlowError: Clone`, something hot sources need
//! to broadcast a failure to several subscribers.

use std::{error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

/// Error signaled through `Subscriber::on_error`.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
  /// `request(0)` was issued. Negative amounts are unrepresentable.
  #[error("non-positive request: demand must be greater than zero")]
  NonPositiveRequest,

  /// A value the upstream was expected to produce is missing, e.g. a mapper
  /// produced nothing for an item seen through fused polling.
  #[error("{0}")]
  NullValue(&'static str),

  /// The upstream emitted more items than were requested.
  #[error("queue is full: upstream emitted more than the {0} requested items")]
  Overflow(usize),

  /// `on_next` reached a subscriber that polls its upstream through queue
  /// fusion and so accepts no pushed items.
  #[error("on_next called on a queue-fused subscriber")]
  PushOnFused,

  /// `on_subscribe` was called more than once on the same subscriber.
  #[error("on_subscribe called more than once")]
  DuplicateSubscription,

  /// A hot source had an item but the subscriber had no outstanding demand.
  #[error("can't deliver value due to lack of requests")]
  LackOfRequests,

  /// A plain message, the common way for sources and user functions to fail.
  #[error("{0}")]
  Message(Arc<str>),

  /// Any other error.
  #[error(transparent)]
  Other(Arc<dyn StdError + Send + Sync>),

  /// Several failures accumulated by an operator that defers errors to the
  /// very end. Causes are kept in the order they occurred.
  #[error("multiple errors occurred: {}", DisplayCauses(.0))]
  Composite(Vec<FlowError>),
}

impl FlowError {
  /// Creates a message error.
  pub fn msg(message: impl Into<Arc<str>>) -> Self { FlowError::Message(message.into()) }

  /// Wraps an arbitrary error.
  pub fn other<E>(err: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    FlowError::Other(Arc::new(err))
  }

  /// Combines accumulated causes into one terminal error.
  ///
  /// A single cause is returned unchanged; composites found among `causes`
  /// are flattened so the result stays one level deep.
  pub fn composite(causes: impl IntoIterator<Item = FlowError>) -> Self {
    let mut flat = Vec::new();
    for cause in causes {
      match cause {
        FlowError::Composite(inner) => flat.extend(inner),
        other => flat.push(other),
      }
    }
    if flat.len() == 1 {
      flat.pop().unwrap_or(FlowError::Composite(Vec::new()))
    } else {
      FlowError::Composite(flat)
    }
  }

  /// The individual causes: the composite's list, or this error alone.
  pub fn causes(&self) -> &[FlowError] {
    match self {
      FlowError::Composite(causes) => causes,
      other => std::slice::from_ref(other),
    }
  }

  /// Returns `true` for errors that signal a broken protocol contract rather
  /// than a failing source or user function.
  pub fn is_protocol_violation(&self) -> bool {
    matches!(
      self,
      FlowError::NonPositiveRequest
        | FlowError::NullValue(_)
        | FlowError::Overflow(_)
        | FlowError::PushOnFused
        | FlowError::DuplicateSubscription
        | FlowError::LackOfRequests
    )
  }
}

impl From<&'static str> for FlowError {
  fn from(message: &'static str) -> Self { FlowError::msg(message) }
}

impl From<String> for FlowError {
  fn from(message: String) -> Self { FlowError::msg(message) }
}

struct DisplayCauses<'a>(&'a [FlowError]);

impl fmt::Display for DisplayCauses<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, cause) in self.0.iter().enumerate() {
      if idx > 0 {
        f.write_str("; ")?;
      }
      write!(f, "{cause}")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[rxflow_macro::test]
  fn composite_of_one_is_the_cause() {
    let err = FlowError::composite([FlowError::msg("boom")]);
    assert_eq!(err.to_string(), "boom");
    assert_eq!(err.causes().len(), 1);
  }

  #[rxflow_macro::test]
  fn composite_keeps_order_and_flattens() {
    let nested = FlowError::Composite(vec![FlowError::msg("b"), FlowError::msg("c")]);
    let err = FlowError::composite([FlowError::msg("a"), nested]);
    let messages: Vec<_> = err.causes().iter().map(ToString::to_string).collect();
    assert_eq!(messages, vec!["a", "b", "c"]);
    assert_eq!(err.to_string(), "multiple errors occurred: a; b; c");
  }

  #[rxflow_macro::test]
  fn protocol_violations_are_classified() {
    assert!(FlowError::NonPositiveRequest.is_protocol_violation());
    assert!(FlowError::Overflow(2).is_protocol_violation());
    assert!(FlowError::PushOnFused.is_protocol_violation());
    assert!(!FlowError::msg("forced failure").is_protocol_violation());
  }

  #[rxflow_macro::test]
  fn wraps_foreign_errors() {
    let io = std::io::Error::other("disk gone");
    let err = FlowError::other(io);
    assert_eq!(err.to_string(), "disk gone");
  }
}
