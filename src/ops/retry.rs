use std::sync::{
  Arc, Weak,
  atomic::{AtomicU8, AtomicU64, Ordering},
};

use crate::{
  arbiter::SubscriptionArbiter,
  demand::validate,
  drain::Wip,
  error::FlowError,
  function::Predicate,
  hooks,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{Subscription, Upstream},
};

/// Resubscribes to the source when it fails with an error the predicate
/// accepts.
///
/// The downstream sees a single subscription for all attempts: demand that
/// was requested but not fulfilled by a failed attempt is handed to the next
/// one.
pub struct RetryOp<S, P> {
  source: Arc<S>,
  predicate: Arc<P>,
}

impl<S, P> RetryOp<S, P> {
  pub fn new(source: S, predicate: P) -> Self {
    RetryOp { source: Arc::new(source), predicate: Arc::new(predicate) }
  }
}

impl<S, P> Publisher for RetryOp<S, P>
where
  S: Publisher + 'static,
  S::Item: Send + 'static,
  P: Predicate<FlowError> + 'static,
{
  type Item = S::Item;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<S::Item>>) {
    let retry = Arc::new_cyclic(|me| RetrySubscriber {
      actual: subscriber,
      source: self.source.clone(),
      predicate: self.predicate.clone(),
      arbiter: SubscriptionArbiter::new(),
      wip: Wip::new(),
      produced: AtomicU64::new(0),
      state: AtomicU8::new(ACTIVE),
      me: me.clone(),
    });
    retry.actual.on_subscribe(Upstream::Push(retry.clone()));
    if !retry.arbiter.is_cancelled() {
      retry.resubscribe();
    }
  }
}

const ACTIVE: u8 = 0;
const RESUBSCRIBING: u8 = 1;
const TERMINATED: u8 = 2;

struct RetrySubscriber<S: Publisher, P> {
  actual: Arc<dyn Subscriber<S::Item>>,
  source: Arc<S>,
  predicate: Arc<P>,
  arbiter: SubscriptionArbiter,
  wip: Wip,
  // Items delivered by the current attempt, settled with the arbiter before
  // the next attempt starts.
  produced: AtomicU64,
  state: AtomicU8,
  me: Weak<Self>,
}

impl<S, P> RetrySubscriber<S, P>
where
  S: Publisher + 'static,
  S::Item: Send + 'static,
  P: Predicate<FlowError> + 'static,
{
  fn terminate(&self) -> bool { self.state.swap(TERMINATED, Ordering::AcqRel) != TERMINATED }

  /// Subscribes to the source once per call. A source that fails
  /// synchronously inside `subscribe` re-enters here and is picked up by the
  /// loop instead of nesting another subscription on the stack.
  fn resubscribe(&self) {
    if !self.wip.enter() {
      return;
    }
    let Some(me) = self.me.upgrade() else {
      return;
    };
    loop {
      if self.arbiter.is_cancelled() || self.state.load(Ordering::Acquire) == TERMINATED {
        return;
      }
      let _ = self
        .state
        .compare_exchange(RESUBSCRIBING, ACTIVE, Ordering::AcqRel, Ordering::Acquire);
      self.source.subscribe(me.clone());
      if self.wip.leave(1) == 0 {
        return;
      }
    }
  }
}

impl<S, P> Subscriber<S::Item> for RetrySubscriber<S, P>
where
  S: Publisher + 'static,
  S::Item: Send + 'static,
  P: Predicate<FlowError> + 'static,
{
  fn on_subscribe(&self, upstream: Upstream<S::Item>) { self.arbiter.set(upstream.into_subscription()); }

  fn on_next(&self, value: S::Item) {
    if self.state.load(Ordering::Acquire) == TERMINATED {
      hooks::on_next_dropped(value);
      return;
    }
    self.produced.fetch_add(1, Ordering::Relaxed);
    self.actual.on_next(value);
  }

  fn on_error(&self, err: FlowError) {
    if self.state.load(Ordering::Acquire) == TERMINATED {
      hooks::on_error_dropped(err);
      return;
    }
    match self.predicate.test(&err) {
      Ok(true) => {
        if self
          .state
          .compare_exchange(ACTIVE, RESUBSCRIBING, Ordering::AcqRel, Ordering::Acquire)
          .is_err()
        {
          hooks::on_error_dropped(err);
          return;
        }
        let produced = self.produced.swap(0, Ordering::Relaxed);
        self.arbiter.produced(produced);
        tracing::trace!(error = %err, produced, "retry: resubscribing");
        self.resubscribe();
      }
      Ok(false) => {
        if self.terminate() {
          self.actual.on_error(err);
        }
      }
      Err(predicate_err) => {
        tracing::debug!(error = %err, "retry: predicate failed, original error discarded");
        if self.terminate() {
          self.actual.on_error(predicate_err);
        }
      }
    }
  }

  fn on_complete(&self) {
    if self.terminate() {
      self.actual.on_complete();
    }
  }
}

impl<S, P> Subscription for RetrySubscriber<S, P>
where
  S: Publisher + 'static,
  S::Item: Send + 'static,
  P: Predicate<FlowError> + 'static,
{
  fn request(&self, n: u64) {
    match validate(n) {
      Ok(n) => self.arbiter.request(n),
      Err(err) => {
        self.arbiter.cancel();
        if self.terminate() {
          self.actual.on_error(err);
        }
      }
    }
  }

  fn cancel(&self) {
    self.state.store(TERMINATED, Ordering::Release);
    self.arbiter.cancel();
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  use crate::{prelude::*, test_subscriber::TestSubscriber};

  fn fail_once(attempts: Arc<AtomicUsize>) -> BoxedPublisher<i32> {
    let flaky = source::defer(move || {
      if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
        source::concat(vec![source::range(1, 2).boxed(), source::throw_err(FlowError::msg("flaky")).boxed()])
          .boxed()
      } else {
        source::range(3, 2).boxed()
      }
    });
    flaky.boxed()
  }

  #[rxflow_macro::test]
  fn resubscribes_when_predicate_accepts() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let ts = TestSubscriber::new();
    fail_once(attempts.clone()).retry(|_| true).subscribe(ts.clone());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    ts.assert_values(&[1, 2, 3, 4]).assert_complete();
  }

  #[rxflow_macro::test]
  fn outstanding_demand_moves_to_next_attempt() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let ts = TestSubscriber::with_request(3);
    fail_once(attempts).retry(|_| true).subscribe(ts.clone());
    ts.assert_values(&[1, 2, 3]).assert_not_complete();
    ts.request(1);
    ts.assert_values(&[1, 2, 3, 4]).assert_complete();
  }

  #[rxflow_macro::test]
  fn rejected_error_is_forwarded() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let ts = TestSubscriber::new();
    fail_once(attempts.clone()).retry(|_| false).subscribe(ts.clone());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    ts.assert_values(&[1, 2]).assert_error_message("flaky");
  }

  #[rxflow_macro::test]
  fn predicate_failure_replaces_the_error() {
    let ts = TestSubscriber::new();
    fail_once(Arc::new(AtomicUsize::new(0)))
      .try_retry(|_| Err(FlowError::msg("predicate failed")))
      .subscribe(ts.clone());
    ts.assert_values(&[1, 2]).assert_error_message("predicate failed");
  }

  #[rxflow_macro::test]
  fn synchronous_failures_do_not_grow_the_stack() {
    let remaining = Arc::new(AtomicUsize::new(100_000));
    let ts = TestSubscriber::new();
    let counter = remaining.clone();
    source::defer(move || {
      if counter.fetch_sub(1, Ordering::SeqCst) > 1 {
        source::throw_err(FlowError::msg("again")).boxed()
      } else {
        source::just(7).boxed()
      }
    })
    .retry(|_| true)
    .subscribe(ts.clone());
    ts.assert_values(&[7]).assert_complete();
  }
}
