//! Lifecycle event bus.
//!
//! Process-local pub/sub; the `EventBus` struct is the exact boundary at
//! which an external transport would be substituted for horizontal scale —
//! no other module knows the bus is local.

mod bus;
mod types;

pub use bus::{EventBus, Subscription};
pub use types::{EventType, LifecycleEvent};
