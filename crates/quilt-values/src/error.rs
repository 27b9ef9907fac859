use quilt_hash::Address;
use thiserror::Error;

/// Errors from the value layer.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("value {0} not found")]
    NotFound(Address),

    #[error("malformed value encoding: {0}")]
    Decode(String),

    #[error("number is not finite")]
    NonFiniteNumber,

    #[error("invalid struct field name: {0:?}")]
    InvalidFieldName(String),

    #[error("invalid struct name: {0:?}")]
    InvalidStructName(String),

    #[error("invalid path: {0}")]
    PathParse(String),

    #[error("path cannot be resolved against a {0:?} value")]
    PathResolve(crate::kind::Kind),

    #[error(transparent)]
    Store(#[from] quilt_chunks::ChunkError),
}

pub type ValueResult<T> = Result<T, ValueError>;
