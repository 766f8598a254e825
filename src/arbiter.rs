//! Switching between successive upstream subscriptions without losing demand.
//!
//! Operators that subscribe to one source after another (the inner sources of
//! `concat_map`, the attempts of `retry`, the parts of `concat`) present a
//! single subscription downstream. The arbiter remembers how much downstream
//! requested and how much was produced, and gives every newly set upstream
//! exactly the outstanding amount.
//!
//! All three entry points (`set`, `request`, `produced`) race with each other
//! and with `cancel`. They take the drain guard on a fast path when it is free
//! and otherwise park their contribution in a `missed_*` slot for the current
//! drainer to pick up.

use std::sync::{
  Arc, Mutex, MutexGuard,
  atomic::{AtomicBool, Ordering},
};

use crate::{
  demand::{Demand, UNBOUNDED, add_cap},
  drain::Wip,
  subscription::Subscription,
};

#[derive(Default)]
struct ArbiterState {
  current: Option<Arc<dyn Subscription>>,
  requested: u64,
}

#[derive(Default)]
pub struct SubscriptionArbiter {
  wip: Wip,
  // Only ever locked by the holder of `wip`.
  state: Mutex<ArbiterState>,
  missed_subscription: Mutex<Option<Arc<dyn Subscription>>>,
  missed_requested: Demand,
  missed_produced: Demand,
  unbounded: AtomicBool,
  cancelled: AtomicBool,
}

impl SubscriptionArbiter {
  pub fn new() -> Self { Self::default() }

  /// Makes `subscription` the current upstream and requests the outstanding
  /// demand from it. The previous upstream is assumed terminated and is not
  /// cancelled. After `cancel` the new subscription is cancelled right away.
  pub fn set(&self, subscription: Arc<dyn Subscription>) {
    if self.is_cancelled() {
      subscription.cancel();
      return;
    }
    if self.wip.try_enter() {
      let requested = {
        let mut state = self.state();
        state.current = Some(subscription.clone());
        state.requested
      };
      if self.wip.leave(1) != 0 {
        self.drain_loop();
      }
      if requested != 0 {
        subscription.request(requested);
      }
      return;
    }
    *self.missed_subscription.lock().unwrap() = Some(subscription);
    self.drain();
  }

  /// Adds downstream demand and forwards it to the current upstream. `n` must
  /// already be validated.
  pub fn request(&self, n: u64) {
    if self.is_unbounded() {
      return;
    }
    if self.wip.try_enter() {
      let current = {
        let mut state = self.state();
        if state.requested != UNBOUNDED {
          state.requested = add_cap(state.requested, n);
          if state.requested == UNBOUNDED {
            self.unbounded.store(true, Ordering::Release);
          }
        }
        state.current.clone()
      };
      if self.wip.leave(1) != 0 {
        self.drain_loop();
      }
      if let Some(current) = current {
        current.request(n);
      }
      return;
    }
    self.missed_requested.add(n);
    self.drain();
  }

  /// Accounts for `n` items delivered downstream.
  pub fn produced(&self, n: u64) {
    if n == 0 || self.is_unbounded() {
      return;
    }
    if self.wip.try_enter() {
      {
        let mut state = self.state();
        if state.requested != UNBOUNDED {
          state.requested = Self::subtract(state.requested, n);
        }
      }
      if self.wip.leave(1) != 0 {
        self.drain_loop();
      }
      return;
    }
    self.missed_produced.add(n);
    self.drain();
  }

  /// Cancels the current upstream and every upstream set afterwards.
  pub fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      self.drain();
    }
  }

  #[inline]
  pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }

  #[inline]
  pub fn is_unbounded(&self) -> bool { self.unbounded.load(Ordering::Acquire) }

  fn state(&self) -> MutexGuard<'_, ArbiterState> { self.state.lock().unwrap() }

  fn subtract(requested: u64, produced: u64) -> u64 {
    if produced > requested {
      tracing::warn!(requested, produced, "more items produced than requested");
      0
    } else {
      requested - produced
    }
  }

  fn drain(&self) {
    if self.wip.enter() {
      self.drain_loop();
    }
  }

  fn drain_loop(&self) {
    let mut missed = 1;
    let mut request_amount = 0_u64;
    let mut request_target: Option<Arc<dyn Subscription>> = None;
    loop {
      let missed_subscription = self.missed_subscription.lock().unwrap().take();
      let missed_requested = self.missed_requested.take();
      let missed_produced = self.missed_produced.take();

      let mut to_cancel = Vec::new();
      {
        let mut state = self.state();
        if self.is_cancelled() {
          to_cancel.extend(state.current.take());
          to_cancel.extend(missed_subscription);
          request_target = None;
          request_amount = 0;
        } else {
          let mut requested = state.requested;
          if requested != UNBOUNDED {
            let added = add_cap(requested, missed_requested);
            requested =
              if added != UNBOUNDED { Self::subtract(added, missed_produced) } else { added };
            state.requested = requested;
            if requested == UNBOUNDED {
              self.unbounded.store(true, Ordering::Release);
            }
          }
          if let Some(next) = missed_subscription {
            state.current = Some(next.clone());
            // The new upstream owes the whole outstanding amount, anything
            // collected for the previous one is void.
            request_amount = requested;
            request_target = if requested != 0 { Some(next) } else { None };
          } else if missed_requested != 0
            && let Some(current) = &state.current
          {
            request_amount = add_cap(request_amount, missed_requested);
            request_target = Some(current.clone());
          }
        }
      }
      for subscription in to_cancel {
        subscription.cancel();
      }

      missed = self.wip.leave(missed);
      if missed == 0 {
        if request_amount != 0
          && let Some(target) = request_target
        {
          target.request(request_amount);
        }
        return;
      }
    }
  }
}
