//! Registration data model.
//!
//! A [`Registration`] binds one [`Identity`] to a registrar and tracks the
//! REGISTER lifecycle: initial registration, the single credential retry
//! after a challenge, periodic refresh before expiry, and optimistic
//! de-registration. All driving logic lives in the client dispatcher; this
//! module holds the records and their public snapshots.
//!
//! # Registration lifecycle
//!
//! ```text
//! Unregistered ──register──▶ Registering ──2xx──▶ Registered
//!                                │  ▲                │   ▲
//!                        failure │  │ challenge      │   │ 2xx
//!                                ▼  │ retry   refresh│   │
//!                              Failed ◀──failure── Refreshing
//! ```
//!
//! Only Registered and Refreshing imply a valid, unexpired binding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sipua_transaction_core::timer::TimerHandle;
use sipua_transaction_core::transaction::ClientTransaction;
use sipua_transaction_core::transport::Credentials;

/// Unique registration identifier assigned by the client.
pub type RegistrationId = Uuid;

/// Who is registering: a user, their domain, and the credential presented
/// when the registrar challenges. Immutable once a registration exists.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub domain: String,
    credential: String,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("credential", &"***")
            .finish()
    }
}

impl Identity {
    pub fn new(
        username: impl Into<String>,
        domain: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            domain: domain.into(),
            credential: credential.into(),
        }
    }

    /// The user's address of record, e.g. `sip:alice@example.com`.
    pub fn uri(&self) -> String {
        format!("sip:{}@{}", self.username, self.domain)
    }

    /// The registrar this identity registers against, e.g. `sip:example.com`.
    pub fn registrar_uri(&self) -> String {
        format!("sip:{}", self.domain)
    }

    /// Authentication material for a challenge retry.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.credential.clone(),
        }
    }
}

/// Current state of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    /// No binding exists (initial state, or after unregister).
    Unregistered,
    /// Initial REGISTER in flight.
    Registering,
    /// Binding accepted and unexpired; a refresh is scheduled.
    Registered,
    /// Refresh REGISTER in flight; the previous binding is still valid.
    Refreshing,
    /// Terminal failure (auth rejected, timeout, transport error). Retrying
    /// is the caller's decision.
    Failed,
}

impl RegistrationState {
    /// Whether a valid, unexpired binding exists in this state.
    pub fn is_bound(&self) -> bool {
        matches!(self, RegistrationState::Registered | RegistrationState::Refreshing)
    }
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationState::Unregistered => write!(f, "Unregistered"),
            RegistrationState::Registering => write!(f, "Registering"),
            RegistrationState::Registered => write!(f, "Registered"),
            RegistrationState::Refreshing => write!(f, "Refreshing"),
            RegistrationState::Failed => write!(f, "Failed"),
        }
    }
}

/// Owned registration record. Mutated only by the dispatcher.
#[derive(Debug)]
pub(crate) struct Registration {
    pub id: RegistrationId,
    pub identity: Identity,
    pub state: RegistrationState,
    /// Binding lifetime we ask for.
    pub requested_expiry: u32,
    /// Binding lifetime the registrar granted on the last 2xx.
    pub granted_expiry: Option<u32>,
    /// The REGISTER currently in flight, if any.
    pub transaction: Option<ClientTransaction>,
    /// Pending refresh, armed while Registered.
    pub refresh_timer: Option<TimerHandle>,
    /// Whether the single credential retry was already spent in the current
    /// REGISTER cycle.
    pub auth_retried: bool,
    /// An expires=0 de-registration is in flight; the record is dropped
    /// when it completes, whatever the outcome.
    pub unregistering: bool,
    pub created_at: DateTime<Utc>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Registration {
    pub fn new(id: RegistrationId, identity: Identity, requested_expiry: u32) -> Self {
        Self {
            id,
            identity,
            state: RegistrationState::Unregistered,
            requested_expiry,
            granted_expiry: None,
            transaction: None,
            refresh_timer: None,
            auth_retried: false,
            unregistering: false,
            created_at: Utc::now(),
            refreshed_at: None,
        }
    }

    /// Disarm the pending refresh, if one is scheduled.
    pub fn cancel_refresh(&mut self) {
        if let Some(handle) = self.refresh_timer.take() {
            handle.cancel();
        }
    }

    /// Public snapshot of this record.
    pub fn info(&self) -> RegistrationInfo {
        RegistrationInfo {
            registration_id: self.id,
            server_uri: self.identity.registrar_uri(),
            user_uri: self.identity.uri(),
            state: self.state,
            expires: self.granted_expiry,
            created_at: self.created_at,
            refreshed_at: self.refreshed_at,
        }
    }
}

/// Point-in-time view of a registration, readable without going through
/// the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationInfo {
    /// Unique registration identifier assigned by the client.
    pub registration_id: RegistrationId,
    /// Registrar this registration targets.
    pub server_uri: String,
    /// Registered address of record.
    pub user_uri: String,
    /// Current state.
    pub state: RegistrationState,
    /// Granted binding lifetime in seconds, once registered.
    pub expires: Option<u32>,
    /// When the registration record was created.
    pub created_at: DateTime<Utc>,
    /// When the binding was last accepted by the registrar.
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_builds_uris() {
        let identity = Identity::new("alice", "example.com", "pw");
        assert_eq!(identity.uri(), "sip:alice@example.com");
        assert_eq!(identity.registrar_uri(), "sip:example.com");
        let credentials = identity.credentials();
        assert_eq!(credentials.username, "alice");
        assert_eq!(credentials.password, "pw");
    }

    #[test]
    fn identity_debug_hides_the_credential() {
        let identity = Identity::new("alice", "example.com", "hunter2");
        let printed = format!("{:?}", identity);
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn only_registered_and_refreshing_are_bound() {
        assert!(RegistrationState::Registered.is_bound());
        assert!(RegistrationState::Refreshing.is_bound());
        assert!(!RegistrationState::Unregistered.is_bound());
        assert!(!RegistrationState::Registering.is_bound());
        assert!(!RegistrationState::Failed.is_bound());
    }

    #[test]
    fn new_registration_starts_unregistered() {
        let registration =
            Registration::new(Uuid::new_v4(), Identity::new("alice", "example.com", "pw"), 3600);
        assert_eq!(registration.state, RegistrationState::Unregistered);
        assert!(registration.transaction.is_none());
        assert!(registration.refresh_timer.is_none());
        assert!(!registration.auth_retried);

        let info = registration.info();
        assert_eq!(info.server_uri, "sip:example.com");
        assert_eq!(info.user_uri, "sip:alice@example.com");
        assert_eq!(info.expires, None);
    }
}
