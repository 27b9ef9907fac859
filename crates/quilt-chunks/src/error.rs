use quilt_hash::Address;
use thiserror::Error;

/// Errors from chunk-store operations.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk {0} not found")]
    NotFound(Address),

    #[error("chunk payload does not hash to its address {0}")]
    AddressMismatch(Address),

    #[error("chunk store is closed")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backing store error: {0}")]
    Backend(String),
}

pub type ChunkResult<T> = Result<T, ChunkError>;
