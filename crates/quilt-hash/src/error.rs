use thiserror::Error;

/// Errors from address parsing and construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("invalid address length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid base32 address: {0}")]
    InvalidEncoding(String),
}
