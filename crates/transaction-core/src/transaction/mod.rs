//! Client transaction types.
//!
//! A transaction is one request plus its retransmissions and eventual
//! response(s). The state machine here is shared by REGISTER, INVITE and
//! BYE; the owning layer gives method-specific meaning to the status codes
//! carried in the emitted [`TransactionEvent`]s.

pub mod client;

pub use client::ClientTransaction;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timer::TimerKind;

/// SIP request methods understood by this user agent core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Register,
    Invite,
    Bye,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Register => write!(f, "REGISTER"),
            Method::Invite => write!(f, "INVITE"),
            Method::Bye => write!(f, "BYE"),
        }
    }
}

/// Unique identifier for a transaction.
///
/// Formatted like a Via branch parameter (`z9hG4bK.<uuid>`) so the value
/// reads naturally in logs and would survive a move onto a real wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    branch: String,
}

impl TransactionKey {
    /// Generate a fresh key.
    pub fn new() -> Self {
        Self {
            branch: format!("z9hG4bK.{}", Uuid::new_v4().as_simple()),
        }
    }

    /// The branch string backing this key.
    pub fn branch(&self) -> &str {
        &self.branch
    }
}

impl std::fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.branch)
    }
}

/// State of a client transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Request sent, nothing heard yet; retransmitting.
    Trying,
    /// A provisional response arrived; still retransmitting.
    Proceeding,
    /// A final response arrived.
    Completed,
    /// Timed out, transport-failed, or aborted.
    Terminated,
}

impl TransactionState {
    /// Whether the transaction is finished from its owner's point of view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Completed | TransactionState::Terminated)
    }

    /// Whether retransmission is still permitted in this state.
    pub fn retransmits(&self) -> bool {
        matches!(self, TransactionState::Trying | TransactionState::Proceeding)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Trying => write!(f, "Trying"),
            TransactionState::Proceeding => write!(f, "Proceeding"),
            TransactionState::Completed => write!(f, "Completed"),
            TransactionState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Timer fire addressed to a specific transaction.
#[derive(Debug, Clone)]
pub struct TransactionTimer {
    pub transaction: TransactionKey,
    pub kind: TimerKind,
}

/// What a transaction reports to its owner.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A 1xx arrived; the transaction keeps running.
    Provisional {
        transaction: TransactionKey,
        method: Method,
        status: u16,
    },
    /// A final (2xx–6xx) response arrived; the transaction is complete.
    /// Method-specific handling (401/407 challenges and the like) is the
    /// owner's job.
    Final {
        transaction: TransactionKey,
        method: Method,
        status: u16,
    },
    /// No final response within the deadline, or retransmissions exhausted.
    TimedOut {
        transaction: TransactionKey,
        method: Method,
    },
    /// The transport reported a delivery failure.
    TransportError {
        transaction: TransactionKey,
        method: Method,
        message: String,
    },
}

impl TransactionEvent {
    /// The transaction this event belongs to.
    pub fn transaction(&self) -> &TransactionKey {
        match self {
            TransactionEvent::Provisional { transaction, .. }
            | TransactionEvent::Final { transaction, .. }
            | TransactionEvent::TimedOut { transaction, .. }
            | TransactionEvent::TransportError { transaction, .. } => transaction,
        }
    }
}

/// Status-code classification helpers.
pub mod status {
    /// 1xx: provisional.
    pub fn is_provisional(status: u16) -> bool {
        (100..200).contains(&status)
    }

    /// 2xx: success.
    pub fn is_success(status: u16) -> bool {
        (200..300).contains(&status)
    }

    /// 401 Unauthorized / 407 Proxy Authentication Required.
    pub fn is_auth_challenge(status: u16) -> bool {
        status == 401 || status == 407
    }

    /// 2xx–6xx: any final response.
    pub fn is_final(status: u16) -> bool {
        (200..700).contains(&status)
    }
}
