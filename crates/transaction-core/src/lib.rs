//! Transaction layer for the sipua user agent.
//!
//! This crate provides the pieces a SIP user agent needs below the
//! registration/call layer:
//!
//! - [`timer`]: a generic one-shot timer service. It schedules callbacks and
//!   delivers them on a channel; it knows nothing about SIP.
//! - [`transport`]: the capability seam to whatever actually carries SIP
//!   requests. Production code plugs a real stack in behind [`transport::Transport`];
//!   tests drive the machine with [`transport::MemoryTransport`].
//! - [`transaction`]: the client transaction state machine shared by
//!   REGISTER, INVITE and BYE. One request, its retransmissions, and its
//!   eventual response(s): Trying/Proceeding/Completed/Terminated with
//!   exponential retransmission backoff and an absolute timeout.
//!
//! The state machine is deliberately method-agnostic: a 401 on a REGISTER
//! and a 486 on an INVITE look the same down here. Interpreting status codes
//! is the job of whoever owns the transaction (see `sipua-client-core`).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sipua_transaction_core::timer::{TimerManager, TimerSettings};
//! use sipua_transaction_core::transaction::{ClientTransaction, Method, TransactionState};
//! use sipua_transaction_core::transport::MemoryTransport;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), sipua_transaction_core::Error> {
//! let transport = Arc::new(MemoryTransport::new());
//! let (timers, _timer_rx) = TimerManager::channel(16);
//!
//! let mut tx = ClientTransaction::initiate(
//!     Method::Register,
//!     "sip:example.com",
//!     None,
//!     Some(3600),
//!     transport.clone(),
//!     timers,
//!     TimerSettings::default(),
//! )
//! .await?;
//!
//! assert_eq!(tx.state(), TransactionState::Trying);
//! assert_eq!(transport.sent_count(), 1);
//!
//! // A final response completes the transaction and cancels its timers.
//! let event = tx.on_response(200);
//! assert!(event.is_some());
//! assert_eq!(tx.state(), TransactionState::Completed);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod timer;
pub mod transaction;
pub mod transport;

pub use error::{Error, Result};
pub use timer::{TimerHandle, TimerManager, TimerSettings};
pub use transaction::{
    ClientTransaction, Method, TransactionEvent, TransactionKey, TransactionState,
    TransactionTimer,
};
pub use transport::{Credentials, MemoryTransport, OutboundRequest, Transport, TransportEvent};
