//! Error types for the transaction layer.

use thiserror::Error;

/// Result type alias for transaction-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the timer service, transport seam and transaction
/// state machine.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The transport refused or failed to carry a request.
    #[error("transport failed: {message}")]
    Transport { message: String },

    /// An operation was attempted on a transaction that has already
    /// reached a terminal state.
    #[error("transaction already terminated")]
    TransactionTerminated,

    /// The channel feeding timer events back to the owner is gone.
    #[error("timer channel closed")]
    TimerChannelClosed,
}

impl Error {
    /// Create a transport error from any displayable cause.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }
}
