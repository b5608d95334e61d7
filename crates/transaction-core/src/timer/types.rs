//! Timer configuration and classification types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a transaction timer fire means to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// The request should be retransmitted (or retransmission has been
    /// exhausted).
    Retransmit,
    /// The transaction's absolute deadline has passed.
    Timeout,
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerKind::Retransmit => write!(f, "Retransmit"),
            TimerKind::Timeout => write!(f, "Timeout"),
        }
    }
}

/// Timing policy for client transactions.
///
/// The defaults follow the classic SIP timer values: retransmissions start
/// at `t1` and double on every fire up to the `t2` ceiling, while
/// `transaction_timeout` bounds the whole attempt (64×T1). A transaction
/// gives up early once `max_retransmits` retransmissions have been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    /// Initial retransmission interval.
    pub t1: Duration,
    /// Ceiling for the exponentially backed-off retransmission interval.
    pub t2: Duration,
    /// Absolute deadline for receiving a final response.
    pub transaction_timeout: Duration,
    /// Maximum number of retransmissions before the transaction times out.
    pub max_retransmits: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            transaction_timeout: Duration::from_secs(32),
            max_retransmits: 7,
        }
    }
}

impl TimerSettings {
    /// Override the initial retransmission interval.
    pub fn with_t1(mut self, t1: Duration) -> Self {
        self.t1 = t1;
        self
    }

    /// Override the retransmission interval ceiling.
    pub fn with_t2(mut self, t2: Duration) -> Self {
        self.t2 = t2;
        self
    }

    /// Override the absolute transaction deadline.
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Override the retransmission ceiling.
    pub fn with_max_retransmits(mut self, max: u32) -> Self {
        self.max_retransmits = max;
        self
    }
}
