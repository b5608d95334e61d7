//! Call session data model.
//!
//! This core manages at most one call at a time. A [`CallSession`] is
//! created by `start_call`, driven through the INVITE/BYE lifecycle by the
//! dispatcher, and destroyed as soon as it reaches a terminal state,
//! which frees the single call slot for the next attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sipua_transaction_core::transaction::ClientTransaction;

use crate::registration::RegistrationId;

/// Unique call identifier assigned by the client.
pub type CallId = Uuid;

/// State of a call session.
///
/// Typical outbound flow: `Idle` → `Calling` → `Ringing` → `Established` →
/// `Terminating` → `Terminated`, with `Failed` reachable from any
/// pre-established state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// No signaling has happened yet for this session.
    Idle,
    /// INVITE sent, nothing heard yet.
    Calling,
    /// The far end reported 180 Ringing.
    Ringing,
    /// The call was answered; media would be flowing.
    Established,
    /// BYE sent, waiting for the far end to confirm.
    Terminating,
    /// The call is over. Terminal.
    Terminated,
    /// Call setup failed (rejected, timed out, transport error). Terminal.
    Failed,
}

impl CallState {
    /// Whether the session is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Terminated | CallState::Failed)
    }

    /// Whether the session occupies the single call slot.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != CallState::Idle
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Idle => write!(f, "Idle"),
            CallState::Calling => write!(f, "Calling"),
            CallState::Ringing => write!(f, "Ringing"),
            CallState::Established => write!(f, "Established"),
            CallState::Terminating => write!(f, "Terminating"),
            CallState::Terminated => write!(f, "Terminated"),
            CallState::Failed => write!(f, "Failed"),
        }
    }
}

/// Owned call record. Mutated only by the dispatcher.
#[derive(Debug)]
pub(crate) struct CallSession {
    pub id: CallId,
    /// The registration this call was placed under.
    pub registration_id: RegistrationId,
    pub local_uri: String,
    pub remote_uri: String,
    pub state: CallState,
    /// The INVITE or BYE currently in flight, if any.
    pub transaction: Option<ClientTransaction>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(
        id: CallId,
        registration_id: RegistrationId,
        local_uri: String,
        remote_uri: String,
    ) -> Self {
        Self {
            id,
            registration_id,
            local_uri,
            remote_uri,
            state: CallState::Idle,
            transaction: None,
            created_at: Utc::now(),
            connected_at: None,
            ended_at: None,
        }
    }

    /// Public snapshot of this record.
    pub fn info(&self) -> CallInfo {
        CallInfo {
            call_id: self.id,
            registration_id: self.registration_id,
            local_uri: self.local_uri.clone(),
            remote_uri: self.remote_uri.clone(),
            state: self.state,
            created_at: self.created_at,
            connected_at: self.connected_at,
            ended_at: self.ended_at,
        }
    }
}

/// Point-in-time view of a call, retained after the call ends so callers
/// can inspect history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInfo {
    pub call_id: CallId,
    /// Registration the call was placed under.
    pub registration_id: RegistrationId,
    /// Local address of record.
    pub local_uri: String,
    /// Callee URI as dialed.
    pub remote_uri: String,
    /// Current (or final) state.
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    /// Set when the call reached Established.
    pub connected_at: Option<DateTime<Utc>>,
    /// Set when the call reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
}
