//! One-shot timer service for the transaction layer.
//!
//! The service is pure scheduling: [`TimerManager::schedule`] arms a timer
//! that, on expiry, delivers an arbitrary event value on the manager's
//! channel. What the event means (a retransmission, a transaction timeout,
//! a registration refresh) is entirely the caller's business.
//!
//! Every armed timer is represented by a [`TimerHandle`] which can be
//! cancelled exactly once. Owners are expected to cancel their handles on
//! every exit path so that no stray event fires against state that no
//! longer exists.

pub mod manager;
pub mod types;

pub use manager::{TimerHandle, TimerManager};
pub use types::{TimerKind, TimerSettings};
