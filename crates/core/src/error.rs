use thiserror::Error;

use crate::Address;

/// Problems with the raw contribution data handed to the engine.
///
/// Any of these aborts the run before anything is normalized or hashed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Contribution map is empty")]
    Empty,

    #[error("Duplicate address: {0}")]
    DuplicateAddress(Address),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Amount overflow: total exceeds 256 bits")]
    Overflow,
}

pub type Result<T> = std::result::Result<T, InputError>;
