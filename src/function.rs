//! User functions handed to operators.
//!
//! Every operator accepts two flavors of closure: a plain one that cannot
//! fail, and a `try_` one returning `Result<_, FlowError>`. Both are wrapped so
//! the operator code calls a single fallible entry point and routes any
//! failure into the terminal error channel.

use crate::error::FlowError;

/// Wraps a closure that cannot fail.
#[derive(Clone, Copy)]
pub struct Infallible<F>(pub F);

/// Wraps a closure returning `Result<_, FlowError>`.
#[derive(Clone, Copy)]
pub struct Fallible<F>(pub F);

/// A test applied to items (or errors).
pub trait Predicate<T: ?Sized>: Send + Sync {
  fn test(&self, value: &T) -> Result<bool, FlowError>;
}

/// A transformation of items.
pub trait Mapper<T>: Send + Sync {
  type Output;

  fn apply(&self, value: T) -> Result<Self::Output, FlowError>;
}

impl<T: ?Sized, F> Predicate<T> for Infallible<F>
where
  F: Fn(&T) -> bool + Send + Sync,
{
  #[inline]
  fn test(&self, value: &T) -> Result<bool, FlowError> { Ok((self.0)(value)) }
}

impl<T: ?Sized, F> Predicate<T> for Fallible<F>
where
  F: Fn(&T) -> Result<bool, FlowError> + Send + Sync,
{
  #[inline]
  fn test(&self, value: &T) -> Result<bool, FlowError> { (self.0)(value) }
}

impl<T, R, F> Mapper<T> for Infallible<F>
where
  F: Fn(T) -> R + Send + Sync,
{
  type Output = R;

  #[inline]
  fn apply(&self, value: T) -> Result<R, FlowError> { Ok((self.0)(value)) }
}

impl<T, R, F> Mapper<T> for Fallible<F>
where
  F: Fn(T) -> Result<R, FlowError> + Send + Sync,
{
  type Output = R;

  #[inline]
  fn apply(&self, value: T) -> Result<R, FlowError> { (self.0)(value) }
}
