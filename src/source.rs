//! Cold sources.
//!
//! `range` and `from_iter` can be fused in SYNC mode: a fused subscriber
//! polls them directly instead of requesting.

mod concat;
mod defer;
mod from_iter;
mod range;
mod trivial;

pub use concat::{Concat, concat};
pub use defer::{Defer, defer};
pub use from_iter::{FromIter, from_iter, just};
pub use range::{Range, range};
pub use trivial::{Empty, Never, ThrowErr, empty, never, throw_err};
