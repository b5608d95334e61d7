//! Call operations on the dispatcher.
//!
//! Implements the single-call INVITE/BYE lifecycle: the call slot gate,
//! ringing and answer handling, best-effort teardown (a BYE that fails
//! still ends the call locally), the CANCEL-equivalent abort of an
//! unanswered INVITE, and inbound signaling (remote hangup, incoming-call
//! notification).

use tracing::{debug, info, trace};
use uuid::Uuid;

use sipua_transaction_core::transaction::{status, ClientTransaction, Method, TransactionEvent};

use crate::call::{CallId, CallSession, CallState};
use crate::client::dispatcher::{Dispatcher, TransactionOwner};
use crate::error::{ClientError, ClientResult};
use crate::registration::RegistrationId;

impl Dispatcher {
    pub(super) async fn start_call_command(
        &mut self,
        registration_id: RegistrationId,
        callee_uri: String,
    ) -> ClientResult<CallId> {
        let local_uri = match self.registrations.get(&registration_id) {
            Some(registration) if registration.state.is_bound() => registration.identity.uri(),
            _ => return Err(ClientError::NotRegistered),
        };
        if let Some(call) = &self.call {
            return Err(ClientError::CallInProgress { call_id: call.id });
        }

        // The callee is an explicit full target; nothing is inferred from
        // the registrant's domain.
        let callee = callee_uri.trim();
        let bare = callee.strip_prefix("sip:").unwrap_or(callee);
        if bare.is_empty() {
            return Err(ClientError::invalid_identity("callee must not be empty"));
        }
        if !bare.contains('@') {
            return Err(ClientError::invalid_identity(
                "callee must be a full user@domain target",
            ));
        }
        let target = format!("sip:{bare}");

        let call_id = Uuid::new_v4();
        let mut call = CallSession::new(call_id, registration_id, local_uri, target.clone());
        info!(id = %call_id, callee = %target, "starting call");
        self.call_state_changed(&mut call, CallState::Calling, None).await;

        match ClientTransaction::initiate(
            Method::Invite,
            target,
            None,
            None,
            self.transport.clone(),
            self.tx_timers.clone(),
            self.config.timers,
        )
        .await
        {
            Ok(transaction) => {
                self.owners
                    .insert(transaction.key().clone(), TransactionOwner::Call(call_id));
                call.transaction = Some(transaction);
                self.call = Some(call);
            }
            Err(e) => {
                // Terminal immediately; the call slot stays free.
                self.call_state_changed(
                    &mut call,
                    CallState::Failed,
                    Some(format!("network error: {e}")),
                )
                .await;
            }
        }
        Ok(call_id)
    }

    pub(super) async fn end_call_command(&mut self, call_id: CallId) -> ClientResult<()> {
        let Some(mut call) = self.call.take() else {
            return Err(ClientError::NoActiveCall);
        };
        if call.id != call_id {
            self.call = Some(call);
            return Err(ClientError::NoActiveCall);
        }

        match call.state {
            CallState::Established => {
                info!(id = %call_id, "hanging up");
                self.call_state_changed(&mut call, CallState::Terminating, None).await;
                let remote = call.remote_uri.clone();
                match ClientTransaction::initiate(
                    Method::Bye,
                    remote,
                    None,
                    None,
                    self.transport.clone(),
                    self.tx_timers.clone(),
                    self.config.timers,
                )
                .await
                {
                    Ok(transaction) => {
                        self.owners
                            .insert(transaction.key().clone(), TransactionOwner::Call(call_id));
                        call.transaction = Some(transaction);
                        self.call = Some(call);
                    }
                    Err(e) => {
                        // Best-effort teardown: the call ends locally even
                        // if the BYE never left the box.
                        self.call_state_changed(
                            &mut call,
                            CallState::Terminated,
                            Some(format!("teardown unconfirmed: {e}")),
                        )
                        .await;
                    }
                }
            }
            CallState::Calling | CallState::Ringing => {
                info!(id = %call_id, state = %call.state, "abandoning call before answer");
                self.abort_transaction(&mut call.transaction);
                self.call_state_changed(
                    &mut call,
                    CallState::Terminated,
                    Some("cancelled".to_string()),
                )
                .await;
            }
            CallState::Terminating => {
                // Teardown already in flight.
                self.call = Some(call);
            }
            other => {
                debug!(id = %call_id, state = %other, "end_call in unexpected state");
                self.call = Some(call);
            }
        }
        Ok(())
    }

    /// A transaction owned by the call produced an event. Returns whether
    /// the session should be kept.
    pub(super) async fn apply_call_event(
        &mut self,
        call: &mut CallSession,
        event: TransactionEvent,
    ) -> bool {
        match call.state {
            CallState::Calling | CallState::Ringing => match event {
                TransactionEvent::Provisional { status: 180, .. } => {
                    if call.state == CallState::Calling {
                        self.call_state_changed(call, CallState::Ringing, None).await;
                    }
                    true
                }
                TransactionEvent::Provisional { status, .. } => {
                    trace!(id = %call.id, status, "provisional response");
                    true
                }
                TransactionEvent::Final { status, .. } => {
                    self.release_transaction(&mut call.transaction);
                    if status::is_success(status) {
                        self.call_state_changed(call, CallState::Established, None).await;
                        true
                    } else {
                        self.call_state_changed(
                            call,
                            CallState::Failed,
                            Some(format!("call rejected with status {status}")),
                        )
                        .await;
                        false
                    }
                }
                TransactionEvent::TimedOut { .. } => {
                    self.release_transaction(&mut call.transaction);
                    self.call_state_changed(
                        call,
                        CallState::Failed,
                        Some("timed out waiting for an answer".to_string()),
                    )
                    .await;
                    false
                }
                TransactionEvent::TransportError { message, .. } => {
                    self.release_transaction(&mut call.transaction);
                    self.call_state_changed(
                        call,
                        CallState::Failed,
                        Some(format!("network error: {message}")),
                    )
                    .await;
                    false
                }
            },
            CallState::Terminating => match event {
                TransactionEvent::Provisional { .. } => true,
                TransactionEvent::Final { status, .. } => {
                    self.release_transaction(&mut call.transaction);
                    let reason = if status::is_success(status) {
                        None
                    } else {
                        Some(format!("teardown unconfirmed: status {status}"))
                    };
                    self.call_state_changed(call, CallState::Terminated, reason).await;
                    false
                }
                TransactionEvent::TimedOut { .. } => {
                    self.release_transaction(&mut call.transaction);
                    self.call_state_changed(
                        call,
                        CallState::Terminated,
                        Some("teardown unconfirmed: timed out".to_string()),
                    )
                    .await;
                    false
                }
                TransactionEvent::TransportError { message, .. } => {
                    self.release_transaction(&mut call.transaction);
                    self.call_state_changed(
                        call,
                        CallState::Terminated,
                        Some(format!("teardown unconfirmed: {message}")),
                    )
                    .await;
                    false
                }
            },
            other => {
                debug!(id = %call.id, state = %other, "transaction event in unexpected call state");
                true
            }
        }
    }

    /// The far end hung up.
    pub(super) async fn handle_remote_bye(&mut self, from: String) {
        let Some(mut call) = self.call.take() else {
            debug!(%from, "BYE with no active call");
            return;
        };
        match call.state {
            CallState::Established => {
                info!(id = %call.id, %from, "remote hangup");
                self.call_state_changed(
                    &mut call,
                    CallState::Terminated,
                    Some("remote hangup".to_string()),
                )
                .await;
            }
            other => {
                // A BYE racing our own teardown (or arriving before answer)
                // changes nothing.
                trace!(id = %call.id, state = %other, "BYE ignored");
                self.call = Some(call);
            }
        }
    }

    /// The far end is calling us. Notification only: this core does not
    /// run server transactions, so acceptance stays with the host layer.
    pub(super) async fn handle_incoming_invite(&mut self, from: String) {
        if self.call.is_some() {
            debug!(%from, "incoming call ignored: call in progress");
            return;
        }
        let callee_uri = match self
            .registrations
            .values()
            .find(|registration| registration.state.is_bound())
        {
            Some(registration) => registration.identity.uri(),
            None => {
                debug!(%from, "incoming call ignored: not registered");
                return;
            }
        };
        info!(%from, "incoming call");
        self.emit(crate::events::ClientEvent::IncomingCall(crate::events::IncomingCallInfo {
            caller_uri: from,
            callee_uri,
            timestamp: chrono::Utc::now(),
        }))
        .await;
    }
}
