//! Registration operations on the dispatcher.
//!
//! Implements the REGISTER lifecycle: fail-fast identity validation, the
//! single credential retry after a 401/407 challenge, refresh scheduling at
//! a margin before expiry, and optimistic de-registration that never
//! resurrects a binding whatever the far end answers.

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use sipua_transaction_core::transaction::{status, ClientTransaction, Method, TransactionEvent};
use sipua_transaction_core::transport::Credentials;

use crate::client::dispatcher::{Dispatcher, TransactionOwner};
use crate::error::{ClientError, ClientResult};
use crate::registration::{Identity, Registration, RegistrationId, RegistrationState};

impl Dispatcher {
    pub(super) async fn register_command(
        &mut self,
        username: String,
        domain: String,
        password: String,
    ) -> ClientResult<RegistrationId> {
        if username.trim().is_empty() {
            return Err(ClientError::invalid_identity("username must not be empty"));
        }
        if domain.trim().is_empty() {
            return Err(ClientError::invalid_identity("domain must not be empty"));
        }

        let identity = Identity::new(username, domain, password);
        let registration_id = Uuid::new_v4();
        let mut registration =
            Registration::new(registration_id, identity, self.config.default_expiry);
        info!(id = %registration_id, user = %registration.identity.uri(), "registering");

        self.registration_state_changed(&mut registration, RegistrationState::Registering, None)
            .await;
        match self.begin_register_cycle(&mut registration).await {
            Ok(()) => {
                self.registrations.insert(registration_id, registration);
            }
            Err(e) => {
                // Terminal right away; only the Failed snapshot survives.
                self.on_register_failure(&mut registration, format!("network error: {e}"))
                    .await;
            }
        }
        Ok(registration_id)
    }

    pub(super) async fn unregister_command(
        &mut self,
        registration_id: RegistrationId,
    ) -> ClientResult<()> {
        let Some(mut registration) = self.registrations.remove(&registration_id) else {
            return Err(ClientError::RegistrationNotFound { registration_id });
        };
        info!(id = %registration_id, state = %registration.state, "unregistering");

        registration.cancel_refresh();
        self.abort_transaction(&mut registration.transaction);

        let was_bound = registration.state.is_bound();
        if registration.state != RegistrationState::Unregistered {
            // Optimistic: locally unregistered right away, whatever the
            // network later says.
            self.registration_state_changed(
                &mut registration,
                RegistrationState::Unregistered,
                None,
            )
            .await;
        }

        if was_bound {
            registration.unregistering = true;
            match self.begin_register_cycle(&mut registration).await {
                Ok(()) => {
                    // Record lives until the expires=0 cycle finishes.
                    self.registrations.insert(registration_id, registration);
                }
                Err(e) => {
                    warn!(id = %registration_id, error = %e, "could not send de-registration");
                    self.registration_state_changed(
                        &mut registration,
                        RegistrationState::Unregistered,
                        Some(format!("network error: {e}")),
                    )
                    .await;
                }
            }
        } else {
            self.store_registration(&registration);
        }
        Ok(())
    }

    /// A refresh timer fired for this registration.
    pub(super) async fn handle_refresh_due(&mut self, registration_id: RegistrationId) {
        let Some(mut registration) = self.registrations.remove(&registration_id) else {
            return;
        };
        registration.refresh_timer = None;
        if registration.state != RegistrationState::Registered {
            trace!(id = %registration_id, state = %registration.state, "stale refresh fire");
            self.registrations.insert(registration_id, registration);
            return;
        }

        debug!(id = %registration_id, "refreshing registration");
        self.registration_state_changed(&mut registration, RegistrationState::Refreshing, None)
            .await;
        match self.begin_register_cycle(&mut registration).await {
            Ok(()) => {
                self.registrations.insert(registration_id, registration);
            }
            Err(e) => {
                self.on_register_failure(&mut registration, format!("network error: {e}"))
                    .await;
            }
        }
    }

    /// A transaction owned by this registration produced an event.
    /// Returns whether the record should be kept.
    pub(super) async fn apply_registration_event(
        &mut self,
        registration: &mut Registration,
        event: TransactionEvent,
        granted_expires: Option<u32>,
    ) -> bool {
        match event {
            TransactionEvent::Provisional { status, .. } => {
                trace!(id = %registration.id, status, "provisional response to REGISTER");
                true
            }
            TransactionEvent::Final { status, .. } => {
                self.release_transaction(&mut registration.transaction);
                if status::is_auth_challenge(status) {
                    self.on_register_challenge(registration).await
                } else if status::is_success(status) {
                    self.on_register_success(registration, granted_expires).await
                } else {
                    self.on_register_failure(
                        registration,
                        format!("registration rejected with status {status}"),
                    )
                    .await
                }
            }
            TransactionEvent::TimedOut { .. } => {
                self.release_transaction(&mut registration.transaction);
                self.on_register_failure(
                    registration,
                    "timed out waiting for a final response".to_string(),
                )
                .await
            }
            TransactionEvent::TransportError { message, .. } => {
                self.release_transaction(&mut registration.transaction);
                self.on_register_failure(registration, format!("network error: {message}"))
                    .await
            }
        }
    }

    /// Start a fresh REGISTER cycle: credentials withheld until challenged,
    /// and the single retry re-armed.
    async fn begin_register_cycle(
        &mut self,
        registration: &mut Registration,
    ) -> sipua_transaction_core::Result<()> {
        registration.auth_retried = false;
        self.send_register(registration, None).await
    }

    async fn send_register(
        &mut self,
        registration: &mut Registration,
        credentials: Option<Credentials>,
    ) -> sipua_transaction_core::Result<()> {
        let expires = if registration.unregistering {
            0
        } else {
            registration.requested_expiry
        };
        let transaction = ClientTransaction::initiate(
            Method::Register,
            registration.identity.registrar_uri(),
            credentials,
            Some(expires),
            self.transport.clone(),
            self.tx_timers.clone(),
            self.config.timers,
        )
        .await?;
        self.owners
            .insert(transaction.key().clone(), TransactionOwner::Registration(registration.id));
        registration.transaction = Some(transaction);
        Ok(())
    }

    async fn on_register_challenge(&mut self, registration: &mut Registration) -> bool {
        if registration.auth_retried {
            warn!(id = %registration.id, "second challenge in one REGISTER cycle");
            return self
                .on_register_failure(registration, "authentication failed".to_string())
                .await;
        }
        registration.auth_retried = true;
        debug!(id = %registration.id, "challenged, retrying with credentials");
        let credentials = registration.identity.credentials();
        if let Err(e) = self.send_register(registration, Some(credentials)).await {
            return self
                .on_register_failure(registration, format!("network error: {e}"))
                .await;
        }
        true
    }

    async fn on_register_success(
        &mut self,
        registration: &mut Registration,
        granted_expires: Option<u32>,
    ) -> bool {
        if registration.unregistering {
            debug!(id = %registration.id, "de-registration confirmed");
            self.store_registration(registration);
            return false;
        }

        let granted = granted_expires.unwrap_or(registration.requested_expiry);
        registration.granted_expiry = Some(granted);
        registration.refreshed_at = Some(chrono::Utc::now());

        let delay = self.config.refresh_delay(granted);
        registration.cancel_refresh();
        registration.refresh_timer = Some(self.refresh_timers.schedule(delay, registration.id));

        info!(id = %registration.id, expires = granted, refresh_in = ?delay, "registered");
        self.registration_state_changed(registration, RegistrationState::Registered, None)
            .await;
        true
    }

    /// Terminal failure of the current cycle. Returns `false` so callers
    /// drop the record; its final snapshot stays readable through the info
    /// map.
    async fn on_register_failure(
        &mut self,
        registration: &mut Registration,
        reason: String,
    ) -> bool {
        registration.cancel_refresh();
        if registration.unregistering {
            // Reported, but the binding stays locally gone.
            warn!(id = %registration.id, %reason, "de-registration attempt failed");
            self.registration_state_changed(
                registration,
                RegistrationState::Unregistered,
                Some(reason),
            )
            .await;
        } else {
            warn!(id = %registration.id, %reason, "registration failed");
            self.registration_state_changed(registration, RegistrationState::Failed, Some(reason))
                .await;
        }
        false
    }
}
