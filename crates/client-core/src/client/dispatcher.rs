//! The single control path.
//!
//! One spawned task owns every mutable record: the registration table, the
//! single call slot, the transaction-to-owner index and both timer
//! services. User commands, timer fires and transport events all funnel
//! into [`Dispatcher::run`]'s select loop and are processed one at a time
//! in arrival order, so no two state transitions ever race.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use sipua_transaction_core::timer::{TimerKind, TimerManager};
use sipua_transaction_core::transaction::{
    ClientTransaction, Method, TransactionEvent, TransactionKey, TransactionTimer,
};
use sipua_transaction_core::transport::{Transport, TransportEvent};

use crate::call::{CallId, CallInfo, CallSession};
use crate::client::config::ClientConfig;
use crate::client::Command;
use crate::events::{CallStatusInfo, ClientEvent, RegistrationStatusInfo};
use crate::registration::{Registration, RegistrationId, RegistrationInfo};

/// Which record owns an outstanding transaction.
#[derive(Debug, Clone, Copy)]
pub(super) enum TransactionOwner {
    Registration(RegistrationId),
    Call(CallId),
}

/// Something that may advance a transaction's state machine.
pub(super) enum TransactionInput {
    Response { status: u16 },
    Timer(TimerKind),
    Error(String),
}

pub(super) struct Dispatcher {
    pub(super) config: ClientConfig,
    pub(super) transport: Arc<dyn Transport>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    events_tx: mpsc::Sender<ClientEvent>,
    pub(super) tx_timers: TimerManager<TransactionTimer>,
    tx_timer_rx: mpsc::Receiver<TransactionTimer>,
    pub(super) refresh_timers: TimerManager<RegistrationId>,
    refresh_rx: mpsc::Receiver<RegistrationId>,
    pub(super) registrations: HashMap<RegistrationId, Registration>,
    pub(super) call: Option<CallSession>,
    pub(super) owners: HashMap<TransactionKey, TransactionOwner>,
    registration_infos: Arc<DashMap<RegistrationId, RegistrationInfo>>,
    call_infos: Arc<DashMap<CallId, CallInfo>>,
}

impl Dispatcher {
    pub(super) fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        cmd_rx: mpsc::Receiver<Command>,
        events_tx: mpsc::Sender<ClientEvent>,
        registration_infos: Arc<DashMap<RegistrationId, RegistrationInfo>>,
        call_infos: Arc<DashMap<CallId, CallInfo>>,
    ) -> Self {
        let (tx_timers, tx_timer_rx) = TimerManager::channel(config.timer_capacity);
        let (refresh_timers, refresh_rx) = TimerManager::channel(config.timer_capacity);
        Self {
            config,
            transport,
            transport_rx,
            cmd_rx,
            events_tx,
            tx_timers,
            tx_timer_rx,
            refresh_timers,
            refresh_rx,
            registrations: HashMap::new(),
            call: None,
            owners: HashMap::new(),
            registration_infos,
            call_infos,
        }
    }

    pub(super) async fn run(mut self) {
        debug!("dispatcher running");
        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    match command {
                        None | Some(Command::Shutdown) => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(timer) = self.tx_timer_rx.recv() => {
                    self.dispatch_transaction_input(
                        timer.transaction,
                        TransactionInput::Timer(timer.kind),
                        None,
                    )
                    .await;
                }
                Some(registration_id) = self.refresh_rx.recv() => {
                    self.handle_refresh_due(registration_id).await;
                }
                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport_event(event).await;
                }
            }
        }
        self.teardown();
        debug!("dispatcher stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Register { username, domain, password, reply } => {
                let result = self.register_command(username, domain, password).await;
                let _ = reply.send(result);
            }
            Command::Unregister { registration_id, reply } => {
                let result = self.unregister_command(registration_id).await;
                let _ = reply.send(result);
            }
            Command::StartCall { registration_id, callee_uri, reply } => {
                let result = self.start_call_command(registration_id, callee_uri).await;
                let _ = reply.send(result);
            }
            Command::EndCall { call_id, reply } => {
                let result = self.end_call_command(call_id).await;
                let _ = reply.send(result);
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Response { transaction, status, expires } => {
                self.dispatch_transaction_input(
                    transaction,
                    TransactionInput::Response { status },
                    expires,
                )
                .await;
            }
            TransportEvent::Request { method, from } => match method {
                Method::Bye => self.handle_remote_bye(from).await,
                Method::Invite => self.handle_incoming_invite(from).await,
                Method::Register => debug!(%from, "ignoring inbound REGISTER"),
            },
            TransportEvent::Error { transaction, message } => {
                self.dispatch_transaction_input(
                    transaction,
                    TransactionInput::Error(message),
                    None,
                )
                .await;
            }
        }
    }

    /// Route a transaction input to whichever record owns the transaction,
    /// advance the machine, and hand the resulting event to the owner's
    /// handler.
    async fn dispatch_transaction_input(
        &mut self,
        key: TransactionKey,
        input: TransactionInput,
        granted_expires: Option<u32>,
    ) {
        match self.owners.get(&key).copied() {
            Some(TransactionOwner::Registration(id)) => {
                let Some(mut registration) = self.registrations.remove(&id) else {
                    self.owners.remove(&key);
                    return;
                };
                let event =
                    Self::feed_transaction(registration.transaction.as_mut(), &key, input).await;
                let keep = match event {
                    Some(event) => {
                        self.apply_registration_event(&mut registration, event, granted_expires)
                            .await
                    }
                    None => true,
                };
                if keep {
                    self.registrations.insert(id, registration);
                }
            }
            Some(TransactionOwner::Call(id)) => {
                let Some(mut call) = self.call.take() else {
                    self.owners.remove(&key);
                    return;
                };
                if call.id != id {
                    self.call = Some(call);
                    return;
                }
                let event = Self::feed_transaction(call.transaction.as_mut(), &key, input).await;
                let keep = match event {
                    Some(event) => self.apply_call_event(&mut call, event).await,
                    None => true,
                };
                if keep {
                    self.call = Some(call);
                }
            }
            None => trace!(id = %key, "input for unknown transaction"),
        }
    }

    async fn feed_transaction(
        transaction: Option<&mut ClientTransaction>,
        key: &TransactionKey,
        input: TransactionInput,
    ) -> Option<TransactionEvent> {
        let transaction = transaction.filter(|tx| tx.key() == key)?;
        match input {
            TransactionInput::Response { status } => transaction.on_response(status),
            TransactionInput::Timer(kind) => transaction.on_timer(kind).await,
            TransactionInput::Error(message) => transaction.on_transport_error(message),
        }
    }

    /// Drop a completed/terminated transaction and its owner-index entry.
    pub(super) fn release_transaction(&mut self, slot: &mut Option<ClientTransaction>) {
        if let Some(transaction) = slot.take() {
            self.owners.remove(transaction.key());
        }
    }

    /// Abort an in-flight transaction (cancels its timers) and drop it.
    pub(super) fn abort_transaction(&mut self, slot: &mut Option<ClientTransaction>) {
        if let Some(mut transaction) = slot.take() {
            transaction.abort();
            self.owners.remove(transaction.key());
        }
    }

    pub(super) async fn emit(&self, event: ClientEvent) {
        if self.events_tx.send(event).await.is_err() {
            trace!("event receiver dropped");
        }
    }

    pub(super) fn store_registration(&self, registration: &Registration) {
        self.registration_infos.insert(registration.id, registration.info());
    }

    pub(super) fn store_call(&self, call: &CallSession) {
        self.call_infos.insert(call.id, call.info());
    }

    /// Transition a registration, publish the snapshot, and notify.
    pub(super) async fn registration_state_changed(
        &mut self,
        registration: &mut Registration,
        new_state: crate::registration::RegistrationState,
        reason: Option<String>,
    ) {
        let old_state = registration.state;
        registration.state = new_state;
        self.store_registration(registration);
        self.emit(ClientEvent::RegistrationStateChanged(RegistrationStatusInfo {
            registration_id: registration.id,
            old_state,
            new_state,
            reason,
            timestamp: chrono::Utc::now(),
        }))
        .await;
    }

    /// Transition a call, publish the snapshot, and notify.
    pub(super) async fn call_state_changed(
        &mut self,
        call: &mut CallSession,
        new_state: crate::call::CallState,
        reason: Option<String>,
    ) {
        let old_state = call.state;
        call.state = new_state;
        if new_state == crate::call::CallState::Established {
            call.connected_at = Some(chrono::Utc::now());
        }
        if new_state.is_terminal() {
            call.ended_at = Some(chrono::Utc::now());
        }
        self.store_call(call);
        self.emit(ClientEvent::CallStateChanged(CallStatusInfo {
            call_id: call.id,
            old_state,
            new_state,
            reason,
            timestamp: chrono::Utc::now(),
        }))
        .await;
    }

    /// Cancel every outstanding timer on the way out so no task outlives
    /// the records it would fire against.
    fn teardown(&mut self) {
        let mut registrations = std::mem::take(&mut self.registrations);
        for registration in registrations.values_mut() {
            registration.cancel_refresh();
            if let Some(transaction) = registration.transaction.as_mut() {
                transaction.abort();
            }
        }
        if let Some(mut call) = self.call.take() {
            if let Some(transaction) = call.transaction.as_mut() {
                transaction.abort();
            }
        }
        self.owners.clear();
    }
}
