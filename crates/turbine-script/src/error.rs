//! Error types for turbine-script

use thiserror::Error;

/// Topology loading and assembly error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Duplicate definition: {0}")]
    DuplicateDefinition(String),

    #[error("No reaction logic registered as {0}")]
    UnknownLogic(String),

    #[error("Composite pool {pool} names unknown member {member}")]
    UnknownMember { pool: String, member: String },

    #[error(transparent)]
    Pump(#[from] turbine_pump::Error),

    #[error(transparent)]
    Core(#[from] turbine_core::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
