//! Demand accounting.
//!
//! Demand is a `u64` that saturates at [`UNBOUNDED`]. Once a counter reached
//! `UNBOUNDED` it stays there: items are no longer subtracted and further
//! requests are no-ops.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::FlowError;

/// Demand value meaning "no backpressure".
pub const UNBOUNDED: u64 = u64::MAX;

/// Checks a `request(n)` amount.
#[inline]
pub fn validate(n: u64) -> Result<u64, FlowError> {
  if n == 0 { Err(FlowError::NonPositiveRequest) } else { Ok(n) }
}

/// Saturating addition capped at [`UNBOUNDED`].
#[inline]
pub fn add_cap(a: u64, b: u64) -> u64 { a.saturating_add(b) }

/// Converts a prefetch amount into a demand value.
#[inline]
pub fn from_prefetch(prefetch: usize) -> u64 {
  if prefetch == usize::MAX { UNBOUNDED } else { prefetch as u64 }
}

/// An atomic demand counter attached to one downstream link.
#[derive(Debug, Default)]
pub struct Demand(AtomicU64);

impl Demand {
  pub fn new() -> Self { Self::default() }

  /// Adds `n` with saturation and returns the value *before* the addition.
  ///
  /// A return value of zero tells the caller that it moved the counter away
  /// from zero and therefore owns the emission loop.
  pub fn add(&self, n: u64) -> u64 {
    let mut current = self.0.load(Ordering::Acquire);
    loop {
      if current == UNBOUNDED {
        return UNBOUNDED;
      }
      let next = add_cap(current, n);
      match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
        Ok(prev) => return prev,
        Err(actual) => current = actual,
      }
    }
  }

  /// Subtracts `n` delivered items and returns what remains.
  ///
  /// Unbounded demand is left untouched. Producing more than requested is a
  /// caller bug; the counter is clamped at zero instead of wrapping.
  pub fn produced(&self, n: u64) -> u64 {
    let mut current = self.0.load(Ordering::Acquire);
    loop {
      if current == UNBOUNDED {
        return UNBOUNDED;
      }
      let next = current.saturating_sub(n);
      match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => return next,
        Err(actual) => current = actual,
      }
    }
  }

  /// Atomically takes the whole counter, leaving zero behind.
  pub fn take(&self) -> u64 { self.0.swap(0, Ordering::AcqRel) }

  #[inline]
  pub fn get(&self) -> u64 { self.0.load(Ordering::Acquire) }

  #[inline]
  pub fn is_unbounded(&self) -> bool { self.get() == UNBOUNDED }
}
