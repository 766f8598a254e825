//! The work-in-progress guard behind every drain loop.
//!
//! Whoever moves the counter from zero owns the drain. Everyone else only
//! bumps the counter and returns; the owner notices the bump when it tries to
//! leave and runs another pass. The canonical loop:
//!
//! ```rust
//! use rxflow::drain::Wip;
//!
//! let wip = Wip::new();
//! if wip.enter() {
//!   let mut missed = 1;
//!   loop {
//!     // one pass over the operator state
//!     missed = wip.leave(missed);
//!     if missed == 0 {
//!       break;
//!     }
//!   }
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct Wip(AtomicUsize);

impl Wip {
  pub fn new() -> Self { Self::default() }

  /// Signals work and returns `true` when the caller became the drainer
  /// (the counter went 0 → 1).
  #[inline]
  pub fn enter(&self) -> bool { self.0.fetch_add(1, Ordering::AcqRel) == 0 }

  /// Takes the guard only if nobody holds it. Unlike [`Wip::enter`] a failed
  /// attempt records nothing.
  #[inline]
  pub fn try_enter(&self) -> bool {
    self.0.load(Ordering::Acquire) == 0
      && self.0.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire).is_ok()
  }

  /// Records more work for the current drainer.
  #[inline]
  pub fn mark(&self) { self.0.fetch_add(1, Ordering::AcqRel); }

  /// Gives back the `missed` amount handled by the finished pass and returns
  /// the work signaled meanwhile. Zero means the guard was released.
  #[inline]
  pub fn leave(&self, missed: usize) -> usize {
    self.0.fetch_sub(missed, Ordering::AcqRel) - missed
  }

  /// Whether some thread currently holds the guard.
  #[inline]
  pub fn is_active(&self) -> bool { self.0.load(Ordering::Acquire) != 0 }
}
