//! Error types for turbine-pump

use thiserror::Error;
use turbine_core::Token;

/// Result type for turbine-pump operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while wiring or driving reactors
#[derive(Debug, Error)]
pub enum Error {
    #[error("pump {0} not found")]
    UnknownPump(Token),

    #[error("reactor {0} not found")]
    UnknownReactor(Token),

    #[error("pool {0} not found")]
    UnknownPool(Token),

    /// The reactor is already scheduled by this powerplant
    #[error("reactor {reactor} is already bound to pump {pump}")]
    AlreadyBound { reactor: Token, pump: Token },

    /// A pool, pump or reactor with this name is already registered
    #[error("name {0} is already registered")]
    DuplicateName(Token),

    /// The pump or runtime no longer accepts work
    #[error("{0} is shut down")]
    Shutdown(Token),

    /// A worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Core error
    #[error("core error: {0}")]
    Core(#[from] turbine_core::Error),
}

// Compile-time check that Error is Send + Sync for thread-safe error propagation.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
