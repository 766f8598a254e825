//! Process-wide fallback hooks.
//!
//! Once a subscriber reached a terminal state (or was cancelled) nothing may be
//! signaled to it anymore. Errors and items that arrive anyway are handed to
//! these hooks instead of disappearing. The defaults log through `tracing`.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::error::FlowError;

type ErrorHook = Arc<dyn Fn(&FlowError) + Send + Sync>;
type NextHook = Arc<dyn Fn(&dyn std::any::Any) + Send + Sync>;

struct Hooks {
  on_error_dropped: Option<ErrorHook>,
  on_next_dropped: Option<NextHook>,
}

static HOOKS: Lazy<RwLock<Hooks>> =
  Lazy::new(|| RwLock::new(Hooks { on_error_dropped: None, on_next_dropped: None }));

/// Replaces the hook invoked for errors that can no longer be delivered.
pub fn set_on_error_dropped<F>(hook: F)
where
  F: Fn(&FlowError) + Send + Sync + 'static,
{
  if let Ok(mut hooks) = HOOKS.write() {
    hooks.on_error_dropped = Some(Arc::new(hook));
  }
}

/// Replaces the hook invoked for items that arrive after termination. The
/// item is passed type-erased.
pub fn set_on_next_dropped<F>(hook: F)
where
  F: Fn(&dyn std::any::Any) + Send + Sync + 'static,
{
  if let Ok(mut hooks) = HOOKS.write() {
    hooks.on_next_dropped = Some(Arc::new(hook));
  }
}

/// Restores the default logging hooks.
pub fn reset() {
  if let Ok(mut hooks) = HOOKS.write() {
    hooks.on_error_dropped = None;
    hooks.on_next_dropped = None;
  }
}

/// Reports an error that could not be delivered to its subscriber.
pub fn on_error_dropped(err: FlowError) {
  // Clone the hook out so user code never runs under the lock.
  let hook = HOOKS.read().ok().and_then(|h| h.on_error_dropped.clone());
  match hook {
    Some(hook) => hook(&err),
    None => tracing::error!(error = %err, "error dropped: subscriber already terminated"),
  }
}

/// Reports an item that could not be delivered to its subscriber.
pub fn on_next_dropped<T: 'static>(value: T) {
  let hook = HOOKS.read().ok().and_then(|h| h.on_next_dropped.clone());
  match hook {
    Some(hook) => hook(&value),
    None => tracing::debug!(
      item_type = std::any::type_name::<T>(),
      "item dropped: subscriber already terminated"
    ),
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;

  #[rxflow_macro::test]
  fn custom_hooks_receive_dropped_signals() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let items = Arc::new(Mutex::new(Vec::new()));
    {
      let errors = errors.clone();
      set_on_error_dropped(move |e| errors.lock().unwrap().push(e.to_string()));
      let items = items.clone();
      set_on_next_dropped(move |v| {
        if let Some(v) = v.downcast_ref::<u64>() {
          items.lock().unwrap().push(*v);
        }
      });
    }

    on_error_dropped(FlowError::msg("hook test: late failure"));
    on_next_dropped(424_242_u64);
    reset();
    on_error_dropped(FlowError::msg("hook test: after reset"));

    let errors = errors.lock().unwrap();
    assert!(errors.iter().any(|e| e == "hook test: late failure"));
    assert!(!errors.iter().any(|e| e == "hook test: after reset"));
    assert!(items.lock().unwrap().contains(&424_242));
  }
}
