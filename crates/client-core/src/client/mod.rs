//! The user-facing client.
//!
//! [`Client`] is a cheap cloneable handle to the dispatcher task that owns
//! all state. API calls validate their preconditions on the control path
//! and return immediately: a successful `register`/`start_call` means
//! "accepted and in flight", with the eventual outcome delivered on the
//! event stream returned by [`ClientBuilder::build`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use sipua_client_core::{Client, ClientEvent};
//! use sipua_transaction_core::transport::{MemoryTransport, TransportEvent};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), sipua_client_core::ClientError> {
//! let transport = Arc::new(MemoryTransport::new());
//! let (net_tx, net_rx) = mpsc::channel::<TransportEvent>(32);
//! let (client, mut events) = Client::builder(transport, net_rx).build();
//!
//! let registration = client.register("alice", "example.com", "secret").await?;
//!
//! // ... feed responses through net_tx, watch events ...
//! if let Some(ClientEvent::RegistrationStateChanged(change)) = events.recv().await {
//!     println!("registration is now {}", change.new_state);
//! }
//!
//! let call = client.start_call(registration, "bob@example.com").await?;
//! client.end_call(call).await?;
//! # Ok(())
//! # }
//! ```

mod calls;
mod config;
mod dispatcher;
mod registrations;

pub use config::ClientConfig;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use sipua_transaction_core::timer::TimerSettings;
use sipua_transaction_core::transport::{Transport, TransportEvent};

use crate::call::{CallId, CallInfo, CallState};
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvent;
use crate::registration::{RegistrationId, RegistrationInfo, RegistrationState};

use dispatcher::Dispatcher;

/// Commands from API handles to the dispatcher.
pub(crate) enum Command {
    Register {
        username: String,
        domain: String,
        password: String,
        reply: oneshot::Sender<ClientResult<RegistrationId>>,
    },
    Unregister {
        registration_id: RegistrationId,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    StartCall {
        registration_id: RegistrationId,
        callee_uri: String,
        reply: oneshot::Sender<ClientResult<CallId>>,
    },
    EndCall {
        call_id: CallId,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Shutdown,
}

/// Aggregate view of the client's current activity.
#[derive(Debug, Clone)]
pub struct ClientStats {
    /// Registrations ever created (all states, history included).
    pub total_registrations: usize,
    /// Registrations currently holding a valid binding.
    pub active_registrations: usize,
    /// Registrations in Failed state.
    pub failed_registrations: usize,
    /// Calls ever placed (history included).
    pub total_calls: usize,
    /// The call currently occupying the single call slot, if any.
    pub active_call: Option<CallId>,
}

/// Builder for a [`Client`].
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    config: ClientConfig,
}

impl ClientBuilder {
    /// Start building a client over the given transport. Inbound signaling
    /// (responses, remote requests) is read from `transport_rx`.
    pub fn new(transport: Arc<dyn Transport>, transport_rx: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            transport,
            transport_rx,
            config: ClientConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Override just the transaction timer policy.
    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.config.timers = timers;
        self
    }

    /// Override just the requested registration lifetime.
    pub fn with_default_expiry(mut self, seconds: u32) -> Self {
        self.config.default_expiry = seconds;
        self
    }

    /// Spawn the dispatcher and hand back the client handle plus the
    /// outward event stream.
    pub fn build(self) -> (Client, mpsc::Receiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_capacity);
        let (events_tx, events_rx) = mpsc::channel(self.config.event_capacity);
        let registrations = Arc::new(DashMap::new());
        let calls = Arc::new(DashMap::new());

        let dispatcher = Dispatcher::new(
            self.config,
            self.transport,
            self.transport_rx,
            cmd_rx,
            events_tx,
            registrations.clone(),
            calls.clone(),
        );
        tokio::spawn(dispatcher.run());

        (Client { cmd_tx, registrations, calls }, events_rx)
    }
}

/// Handle to a running SIP user-agent core.
#[derive(Debug, Clone)]
pub struct Client {
    cmd_tx: mpsc::Sender<Command>,
    registrations: Arc<DashMap<RegistrationId, RegistrationInfo>>,
    calls: Arc<DashMap<CallId, CallInfo>>,
}

impl Client {
    /// Start building a client over the given transport.
    pub fn builder(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
    ) -> ClientBuilder {
        ClientBuilder::new(transport, transport_rx)
    }

    /// Register `username@domain`, presenting `password` if challenged.
    ///
    /// Returns as soon as the registration is accepted onto the control
    /// path; watch the event stream for the outcome. Fails fast with
    /// [`ClientError::InvalidIdentity`] on empty username or domain.
    pub async fn register(
        &self,
        username: impl Into<String>,
        domain: impl Into<String>,
        password: impl Into<String>,
    ) -> ClientResult<RegistrationId> {
        self.request(|reply| Command::Register {
            username: username.into(),
            domain: domain.into(),
            password: password.into(),
            reply,
        })
        .await
    }

    /// Drop a registration. The local binding is released immediately; the
    /// expires=0 REGISTER completes in the background.
    pub async fn unregister(&self, registration_id: RegistrationId) -> ClientResult<()> {
        self.request(|reply| Command::Unregister { registration_id, reply }).await
    }

    /// Place a call to `callee_uri` (a full `user@domain` target, with or
    /// without the `sip:` scheme) under an active registration.
    pub async fn start_call(
        &self,
        registration_id: RegistrationId,
        callee_uri: impl Into<String>,
    ) -> ClientResult<CallId> {
        self.request(|reply| Command::StartCall {
            registration_id,
            callee_uri: callee_uri.into(),
            reply,
        })
        .await
    }

    /// End a call. From Established this sends a BYE and tears down
    /// best-effort; before answer it aborts the INVITE outright. The call
    /// always reaches Terminated.
    pub async fn end_call(&self, call_id: CallId) -> ClientResult<()> {
        self.request(|reply| Command::EndCall { call_id, reply }).await
    }

    /// Stop the dispatcher. Outstanding transactions are aborted and their
    /// timers cancelled.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }

    /// Snapshot of one registration (history included).
    pub fn registration_info(&self, registration_id: RegistrationId) -> Option<RegistrationInfo> {
        self.registrations.get(&registration_id).map(|entry| entry.value().clone())
    }

    /// Current state of one registration.
    pub fn registration_state(&self, registration_id: RegistrationId) -> Option<RegistrationState> {
        self.registrations.get(&registration_id).map(|entry| entry.value().state)
    }

    /// Snapshot of one call (history included).
    pub fn call_info(&self, call_id: CallId) -> Option<CallInfo> {
        self.calls.get(&call_id).map(|entry| entry.value().clone())
    }

    /// Current state of one call.
    pub fn call_state(&self, call_id: CallId) -> Option<CallState> {
        self.calls.get(&call_id).map(|entry| entry.value().state)
    }

    /// Aggregate activity counters.
    pub fn stats(&self) -> ClientStats {
        let total_registrations = self.registrations.len();
        let active_registrations = self
            .registrations
            .iter()
            .filter(|entry| entry.value().state.is_bound())
            .count();
        let failed_registrations = self
            .registrations
            .iter()
            .filter(|entry| entry.value().state == RegistrationState::Failed)
            .count();
        let total_calls = self.calls.len();
        let active_call = self
            .calls
            .iter()
            .find(|entry| entry.value().state.is_active())
            .map(|entry| *entry.key());
        ClientStats {
            total_registrations,
            active_registrations,
            failed_registrations,
            total_calls,
            active_call,
        }
    }

    async fn request<T>(
        &self,
        make_command: impl FnOnce(oneshot::Sender<ClientResult<T>>) -> Command,
    ) -> ClientResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make_command(reply_tx))
            .await
            .map_err(|_| ClientError::Shutdown)?;
        reply_rx.await.map_err(|_| ClientError::Shutdown)?
    }
}
