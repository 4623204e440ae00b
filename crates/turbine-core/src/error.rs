//! Error types for turbine-core

use crate::reactor::Lifecycle;
use crate::Token;
use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The pool cannot satisfy an allocation right now
    #[error("pool {pool} exhausted: cannot allocate {requested} bytes")]
    Exhausted { pool: Token, requested: usize },

    /// Allocation request outside the pool's size window or the source buffer
    #[error(
        "invalid length for pool {pool}: offset {offset} + length {length} over buffer of {buffer_len}, allowed sizes [{min}, {max}]"
    )]
    InvalidLength {
        pool: Token,
        offset: usize,
        length: usize,
        buffer_len: usize,
        min: usize,
        max: usize,
    },

    /// Registration named a subscriber with no bound mailbox
    #[error("unknown subscriber: {0}")]
    UnknownSubscriber(Token),

    #[error("subscriber already bound: {0}")]
    DuplicateSubscriber(Token),

    #[error("unknown input port: {0}")]
    UnknownInput(Token),

    #[error("unknown output port: {0}")]
    UnknownOutput(Token),

    /// Lifecycle request not allowed from the current state
    #[error("reactor {reactor}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        reactor: Token,
        from: Lifecycle,
        to: Lifecycle,
    },

    /// Reactor setup hook failed; the reactor is stopped
    #[error("reactor {reactor} failed to start: {reason}")]
    Setup { reactor: Token, reason: String },

    #[error("mailbox {0} must have a capacity of at least 1")]
    ZeroCapacity(Token),

    /// Operand is not an 8-byte scalar
    #[error("operand of {len} bytes is not a 64-bit scalar")]
    NotScalar { len: usize },

    #[error("operand stack is empty")]
    EmptyStack,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Failure raised by a reaction task
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReactionFailure {
    /// The task reported a failure
    #[error("{0}")]
    Failed(String),

    /// The task hit a runtime error (allocation, routing, ...)
    #[error(transparent)]
    Runtime(#[from] Error),

    /// The task panicked; the panic was caught at the crank boundary
    #[error("reaction panicked: {0}")]
    Panicked(String),
}

impl ReactionFailure {
    /// Create a failure from a message
    pub fn msg(message: impl Into<String>) -> Self {
        ReactionFailure::Failed(message.into())
    }
}

fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
    _assert_error_send_sync::<ReactionFailure>();
}
