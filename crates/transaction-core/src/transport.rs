//! Transport capability seam.
//!
//! The transaction layer never touches a socket. Everything it sends goes
//! through the [`Transport`] trait, and everything it receives arrives as a
//! [`TransportEvent`] on a channel owned by the caller. A production build
//! plugs the platform SIP stack in behind this seam; the test suites use
//! [`MemoryTransport`], which records outbound requests and lets the test
//! script the network's answers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transaction::{Method, TransactionKey};

/// Authentication material attached to a request after a 401/407 challenge.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the password, not even in debug logs.
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A request handed to the transport for delivery.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Transaction this request (and its retransmissions) belongs to.
    pub transaction: TransactionKey,
    pub method: Method,
    /// Request target URI, e.g. `sip:example.com` or `sip:bob@example.com`.
    pub target: String,
    /// Present on the credential re-attempt after a challenge.
    pub credentials: Option<Credentials>,
    /// Requested binding lifetime; only meaningful for REGISTER
    /// (0 de-registers).
    pub expires: Option<u32>,
}

/// Capability interface to the network.
///
/// Implementations must not block: a send either succeeds quickly or fails
/// with a transport error that terminates the owning transaction.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send (or retransmit) a request.
    async fn send_request(&self, request: &OutboundRequest) -> Result<()>;
}

/// An inbound signaling event from the network side of the seam.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A response to one of our requests, matched by transaction key.
    Response {
        transaction: TransactionKey,
        status: u16,
        /// Granted binding lifetime, when the response carries one
        /// (REGISTER 2xx).
        expires: Option<u32>,
    },
    /// A request from the far end (inbound INVITE, remote BYE).
    Request { method: Method, from: String },
    /// The transport noticed an asynchronous delivery failure for a
    /// previously accepted request.
    Error {
        transaction: TransactionKey,
        message: String,
    },
}

/// In-memory transport double.
///
/// Records every outbound request for inspection and can be told to start
/// failing sends to simulate a broken network path. Responses are injected
/// by the test through whatever [`TransportEvent`] channel the client was
/// built with; this type only covers the outbound half.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<OutboundRequest>>,
    sent_notify: Notify,
    failing: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sent so far, oldest first.
    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().expect("transport lock").clone()
    }

    /// Number of requests sent so far (retransmissions included).
    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("transport lock").len()
    }

    /// The most recently sent request, if any.
    pub fn last_sent(&self) -> Option<OutboundRequest> {
        self.sent.lock().expect("transport lock").last().cloned()
    }

    /// Make every subsequent send fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Wait until at least `count` requests have been sent.
    pub async fn wait_for_sends(&self, count: usize) {
        loop {
            // Register interest before checking, so a send landing between
            // the check and the wait cannot be missed.
            let notified = self.sent_notify.notified();
            if self.sent_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_request(&self, request: &OutboundRequest) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::transport("simulated send failure"));
        }
        debug!(id = %request.transaction, method = %request.method, target = %request.target, "memory transport send");
        self.sent.lock().expect("transport lock").push(request.clone());
        self.sent_notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method) -> OutboundRequest {
        OutboundRequest {
            transaction: TransactionKey::new(),
            method,
            target: "sip:example.com".to_string(),
            credentials: None,
            expires: Some(3600),
        }
    }

    #[tokio::test]
    async fn records_sent_requests_in_order() {
        let transport = MemoryTransport::new();
        transport.send_request(&request(Method::Register)).await.unwrap();
        transport.send_request(&request(Method::Invite)).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].method, Method::Register);
        assert_eq!(sent[1].method, Method::Invite);
        assert_eq!(transport.last_sent().unwrap().method, Method::Invite);
    }

    #[tokio::test]
    async fn failing_mode_rejects_sends_without_recording() {
        let transport = MemoryTransport::new();
        transport.set_failing(true);

        let err = transport.send_request(&request(Method::Bye)).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(transport.sent_count(), 0);

        transport.set_failing(false);
        transport.send_request(&request(Method::Bye)).await.unwrap();
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn credentials_debug_never_leaks_the_password() {
        let credentials = Credentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }
}
