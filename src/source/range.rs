use std::sync::{
  Arc, Mutex,
  atomic::{AtomicBool, AtomicI64, Ordering},
};

use crate::{
  demand::{Demand, UNBOUNDED, validate},
  error::FlowError,
  fusion::{FusionMode, FusionRequest, QueueSubscription},
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{EmptySubscription, Subscription, Upstream},
};

/// Emits `count` consecutive integers starting at `start`.
///
/// # Panics
///
/// Panics when the last value would not fit into an `i32`.
pub fn range(start: i32, count: usize) -> Range {
  let end = i64::from(start) + count as i64;
  assert!(end - 1 <= i64::from(i32::MAX), "range({start}, {count}) overflows i32");
  Range { start: i64::from(start), end }
}

#[derive(Debug, Clone, Copy)]
pub struct Range {
  start: i64,
  end: i64,
}

impl Publisher for Range {
  type Item = i32;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<i32>>) {
    if self.start == self.end {
      subscriber.on_subscribe(Upstream::Push(Arc::new(EmptySubscription)));
      subscriber.on_complete();
      return;
    }
    let subscription = Arc::new(RangeSubscription {
      actual: Mutex::new(Some(subscriber.clone())),
      index: AtomicI64::new(self.start),
      end: self.end,
      requested: Demand::new(),
      cancelled: AtomicBool::new(false),
    });
    subscriber.on_subscribe(Upstream::Fused(subscription));
  }
}

struct RangeSubscription {
  // Released on termination so the subscriber chain can be dropped.
  actual: Mutex<Option<Arc<dyn Subscriber<i32>>>>,
  index: AtomicI64,
  end: i64,
  requested: Demand,
  cancelled: AtomicBool,
}

impl RangeSubscription {
  fn actual(&self) -> Option<Arc<dyn Subscriber<i32>>> { self.actual.lock().unwrap().clone() }

  fn release(&self) -> Option<Arc<dyn Subscriber<i32>>> { self.actual.lock().unwrap().take() }

  fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }

  fn complete(&self) {
    if let Some(actual) = self.release() {
      actual.on_complete();
    }
  }

  fn fast_path(&self, actual: &dyn Subscriber<i32>) {
    let mut index = self.index.load(Ordering::Relaxed);
    while index != self.end {
      if self.is_cancelled() {
        return;
      }
      actual.on_next(index as i32);
      index += 1;
    }
    self.index.store(index, Ordering::Relaxed);
    if !self.is_cancelled() {
      self.complete();
    }
  }

  fn slow_path(&self, actual: &dyn Subscriber<i32>, mut requested: u64) {
    let mut emitted = 0;
    let mut index = self.index.load(Ordering::Relaxed);
    loop {
      while emitted != requested && index != self.end {
        if self.is_cancelled() {
          return;
        }
        actual.on_next(index as i32);
        emitted += 1;
        index += 1;
      }
      if self.is_cancelled() {
        return;
      }
      if index == self.end {
        self.index.store(index, Ordering::Relaxed);
        self.complete();
        return;
      }
      requested = self.requested.get();
      if requested == emitted {
        self.index.store(index, Ordering::Relaxed);
        requested = self.requested.produced(emitted);
        if requested == 0 {
          return;
        }
        emitted = 0;
      }
    }
  }
}

impl Subscription for RangeSubscription {
  fn request(&self, n: u64) {
    let n = match validate(n) {
      Ok(n) => n,
      Err(err) => {
        self.cancelled.store(true, Ordering::Release);
        if let Some(actual) = self.release() {
          actual.on_error(err);
        }
        return;
      }
    };
    if self.requested.add(n) != 0 {
      return;
    }
    let Some(actual) = self.actual() else {
      return;
    };
    if n == UNBOUNDED {
      self.fast_path(actual.as_ref());
    } else {
      self.slow_path(actual.as_ref(), n);
    }
  }

  fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      self.release();
    }
  }
}

impl QueueSubscription<i32> for RangeSubscription {
  fn request_fusion(&self, requested: FusionRequest) -> FusionMode {
    if !requested.accepts(FusionMode::Sync) {
      return FusionMode::None;
    }
    // A SYNC-fused subscriber polls; it never hears from this side again.
    self.release();
    FusionMode::Sync
  }

  fn poll(&self) -> Result<Option<i32>, FlowError> {
    let index = self.index.load(Ordering::Relaxed);
    if index == self.end {
      return Ok(None);
    }
    self.index.store(index + 1, Ordering::Relaxed);
    Ok(Some(index as i32))
  }

  fn size(&self) -> usize { (self.end - self.index.load(Ordering::Relaxed)) as usize }

  fn clear(&self) { self.index.store(self.end, Ordering::Relaxed); }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_subscriber::TestSubscriber;

  #[rxflow_macro::test]
  fn emits_count_values() {
    let ts = TestSubscriber::new();
    range(5, 3).subscribe(ts.clone());
    ts.assert_values(&[5, 6, 7]).assert_complete();
  }

  #[rxflow_macro::test]
  fn honors_demand() {
    let ts = TestSubscriber::with_request(2);
    range(1, 5).subscribe(ts.clone());
    ts.assert_values(&[1, 2]).assert_not_complete();
    ts.request(3);
    ts.assert_values(&[1, 2, 3, 4, 5]).assert_complete();
  }

  #[rxflow_macro::test]
  fn empty_range_completes_without_demand() {
    let ts = TestSubscriber::with_request(0);
    range(1, 0).subscribe(ts.clone());
    ts.assert_no_values().assert_complete();
  }

  #[rxflow_macro::test]
  fn reaches_i32_max() {
    let ts = TestSubscriber::new();
    range(i32::MAX - 1, 2).subscribe(ts.clone());
    ts.assert_values(&[i32::MAX - 1, i32::MAX]).assert_complete();
  }

  #[test]
  #[should_panic(expected = "overflows i32")]
  fn overflowing_range_is_rejected() { let _ = range(i32::MAX, 2); }

  #[rxflow_macro::test]
  fn sync_fusion_polls_to_completion() {
    let ts = TestSubscriber::fused(FusionRequest::Sync, 0);
    range(1, 3).subscribe(ts.clone());
    assert_eq!(ts.fusion_mode(), FusionMode::Sync);
    ts.assert_values(&[1, 2, 3]).assert_complete();
  }

  #[rxflow_macro::test]
  fn zero_request_is_signaled_as_error() {
    let ts = TestSubscriber::with_request(0);
    range(1, 3).subscribe(ts.clone());
    ts.request(0);
    ts.assert_no_values().assert_error_message(&FlowError::NonPositiveRequest.to_string());
  }
}
