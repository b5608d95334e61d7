//! Error types and handling for the client-core library.
//!
//! Errors split into two families:
//!
//! - **Precondition violations** (`InvalidIdentity`, `NotRegistered`,
//!   `CallInProgress`, `NoActiveCall`, `RegistrationNotFound`) are returned
//!   directly from the API call that caused them. No transaction is created
//!   and nothing changes.
//! - **Protocol outcomes** (`AuthFailed`, `Timeout`, `NetworkError`) resolve
//!   asynchronously: the API call has already returned a handle, and the
//!   outcome arrives as a state-change event carrying the reason.
//!
//! None of these crash the process; every failure path leaves the owning
//! registration or call in an explicit terminal state.

use thiserror::Error;

use crate::call::CallId;
use crate::registration::RegistrationId;

/// Result type alias for client-core operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by client operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Malformed local input; nothing was sent.
    #[error("invalid identity: {reason}")]
    InvalidIdentity { reason: String },

    /// The server rejected our credentials after the single challenge
    /// retry.
    #[error("authentication failed")]
    AuthFailed,

    /// No final response within the deadline after exhausting
    /// retransmissions. The whole operation may be retried by the caller.
    #[error("operation timed out")]
    Timeout,

    /// The transport reported a delivery failure.
    #[error("network error: {reason}")]
    NetworkError { reason: String },

    /// The referenced registration does not exist.
    #[error("registration not found: {registration_id}")]
    RegistrationNotFound { registration_id: RegistrationId },

    /// Calls require a registration in Registered or Refreshing state.
    #[error("not registered")]
    NotRegistered,

    /// This core handles a single call at a time.
    #[error("call already in progress: {call_id}")]
    CallInProgress { call_id: CallId },

    /// `end_call` with no live call session.
    #[error("no active call")]
    NoActiveCall,

    /// The client's dispatcher has shut down.
    #[error("client has shut down")]
    Shutdown,
}

impl ClientError {
    /// Create an invalid-identity error.
    pub fn invalid_identity(reason: impl Into<String>) -> Self {
        Self::InvalidIdentity { reason: reason.into() }
    }

    /// Create a network error.
    pub fn network_error(reason: impl Into<String>) -> Self {
        Self::NetworkError { reason: reason.into() }
    }

    /// Local precondition violations: no transaction was created and the
    /// call had no side effect.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidIdentity { .. }
                | ClientError::RegistrationNotFound { .. }
                | ClientError::NotRegistered
                | ClientError::CallInProgress { .. }
                | ClientError::NoActiveCall
        )
    }

    /// Whether retrying the whole operation might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout | ClientError::NetworkError { .. }
        )
    }

    /// Coarse category for metrics and logging.
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::InvalidIdentity { .. } => "input",
            ClientError::AuthFailed => "auth",
            ClientError::Timeout | ClientError::NetworkError { .. } => "network",
            ClientError::RegistrationNotFound { .. } | ClientError::NotRegistered => "registration",
            ClientError::CallInProgress { .. } | ClientError::NoActiveCall => "call",
            ClientError::Shutdown => "lifecycle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_violations_are_classified() {
        assert!(ClientError::NotRegistered.is_precondition_violation());
        assert!(ClientError::NoActiveCall.is_precondition_violation());
        assert!(ClientError::invalid_identity("empty").is_precondition_violation());
        assert!(!ClientError::Timeout.is_precondition_violation());
        assert!(!ClientError::AuthFailed.is_precondition_violation());
    }

    #[test]
    fn only_transient_failures_are_recoverable() {
        assert!(ClientError::Timeout.is_recoverable());
        assert!(ClientError::network_error("unreachable").is_recoverable());
        assert!(!ClientError::AuthFailed.is_recoverable());
        assert!(!ClientError::NotRegistered.is_recoverable());
    }

    #[test]
    fn categories_group_sensibly() {
        assert_eq!(ClientError::AuthFailed.category(), "auth");
        assert_eq!(ClientError::Timeout.category(), "network");
        assert_eq!(ClientError::NoActiveCall.category(), "call");
    }
}
