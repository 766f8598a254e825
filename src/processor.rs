//! Hot sources that are fed by hand (or by subscribing them to another
//! publisher) and replay nothing.

mod direct;
mod unicast;

pub use direct::DirectProcessor;
pub use unicast::UnicastProcessor;
