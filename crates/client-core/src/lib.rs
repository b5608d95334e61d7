//! # sipua-client-core
//!
//! Registration and call-control coordination for the sipua user agent: a
//! self-contained SIP call-control engine covering the registration
//! lifecycle and a single concurrent audio call, testable without any
//! platform SIP service.
//!
//! ## Architecture
//!
//! ```text
//! host application
//!       │  register / start_call / end_call        ┌────────────────┐
//!       ▼                                          │  event stream  │
//! ┌───────────┐  commands   ┌────────────────┐     └────────▲───────┘
//! │  Client   │────────────▶│   dispatcher   │──────────────┘
//! └───────────┘             │ (single task)  │
//!                           │ registrations  │  transactions   ┌───────────┐
//!                           │ call session   │────────────────▶│ transport │
//!                           │ timers         │◀────────────────│   seam    │
//!                           └────────────────┘  inbound events └───────────┘
//! ```
//!
//! Every state transition (user command, timer fire, network response)
//! runs on the dispatcher's one control path, in arrival order. The
//! transaction machinery underneath lives in `sipua-transaction-core`.
//!
//! ## Key types
//!
//! - [`Client`] / [`ClientBuilder`]: the public API surface
//! - [`ClientEvent`]: the outward notification stream
//! - [`RegistrationState`] / [`CallState`]: lifecycle states
//! - [`ClientError`]: the error taxonomy (precondition violations fail
//!   fast; protocol outcomes arrive as events)

pub mod call;
pub mod client;
pub mod error;
pub mod events;
pub mod registration;

pub use call::{CallId, CallInfo, CallState};
pub use client::{Client, ClientBuilder, ClientConfig, ClientStats};
pub use error::{ClientError, ClientResult};
pub use events::{CallStatusInfo, ClientEvent, IncomingCallInfo, RegistrationStatusInfo};
pub use registration::{Identity, RegistrationId, RegistrationInfo, RegistrationState};

// Re-export the transaction-layer pieces a host needs to wire a client up.
pub use sipua_transaction_core::timer::TimerSettings;
pub use sipua_transaction_core::transaction::Method;
pub use sipua_transaction_core::transport::{
    Credentials, MemoryTransport, OutboundRequest, Transport, TransportEvent,
};
