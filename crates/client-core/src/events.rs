//! Outward notifications.
//!
//! Everything the client wants a host application to know flows through a
//! single ordered stream of [`ClientEvent`]s, handed out by
//! `ClientBuilder::build`. Because every state transition happens on the
//! dispatcher's one control path, events arrive in exactly the order the
//! transitions occurred: no reentrancy, no interleaving.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{CallId, CallState};
use crate::registration::{RegistrationId, RegistrationState};

/// A notification from the client to its host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientEvent {
    /// A registration moved between states.
    RegistrationStateChanged(RegistrationStatusInfo),
    /// A call moved between states.
    CallStateChanged(CallStatusInfo),
    /// Someone is calling us. Notification only: this core does not answer.
    IncomingCall(IncomingCallInfo),
}

/// Details of a registration state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationStatusInfo {
    pub registration_id: RegistrationId,
    pub old_state: RegistrationState,
    pub new_state: RegistrationState,
    /// Why, when the transition was not the happy path (e.g.
    /// "authentication failed", "timed out waiting for a final response").
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Details of a call state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStatusInfo {
    pub call_id: CallId,
    pub old_state: CallState,
    pub new_state: CallState,
    /// Why, when the transition was not the happy path (e.g. "remote
    /// hangup", "call rejected with status 486").
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Details of an unanswered inbound call attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingCallInfo {
    /// Who is calling.
    pub caller_uri: String,
    /// Which of our registered identities they reached.
    pub callee_uri: String,
    pub timestamp: DateTime<Utc>,
}
