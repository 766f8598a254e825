//! Runtime defaults for queue sizes.
//!
//! Values are read once from the environment and fall back to built-in
//! defaults when unset or unparsable.

use once_cell::sync::Lazy;

/// Environment variable overriding [`Config::xs_buffer_size`].
pub const XS_BUFFER_SIZE_ENV: &str = "RXFLOW_BUFFER_SIZE_XS";

const XS_BUFFER_SIZE_DEFAULT: usize = 32;
const XS_BUFFER_SIZE_MIN: usize = 8;

/// Queue size defaults shared by the operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  xs_buffer_size: usize,
}

static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

impl Config {
  /// The process-wide configuration.
  pub fn get() -> &'static Config { &CONFIG }

  /// Default prefetch of operators that keep few items in flight, such as
  /// `concat_map`.
  pub fn xs_buffer_size() -> usize { CONFIG.xs_buffer_size }

  fn from_env() -> Config {
    Config::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Config {
    let read = |key: &str, default: usize, min: usize| {
      lookup(key)
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .map_or(default, |v| v.max(min))
    };
    Config { xs_buffer_size: read(XS_BUFFER_SIZE_ENV, XS_BUFFER_SIZE_DEFAULT, XS_BUFFER_SIZE_MIN) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[rxflow_macro::test]
  fn defaults_when_unset() {
    let config = Config::from_lookup(|_| None);
    assert_eq!(config.xs_buffer_size, 32);
  }

  #[rxflow_macro::test]
  fn overrides_are_clamped() {
    let config = Config::from_lookup(|key| (key == XS_BUFFER_SIZE_ENV).then(|| "2".to_owned()));
    assert_eq!(config.xs_buffer_size, 8);
  }

  #[rxflow_macro::test]
  fn garbage_is_ignored() {
    let config = Config::from_lookup(|_| Some(" lots ".to_owned()));
    assert_eq!(config.xs_buffer_size, 32);
    let config = Config::from_lookup(|_| Some(" 64 ".to_owned()));
    assert_eq!(config.xs_buffer_size, 64);
  }
}
