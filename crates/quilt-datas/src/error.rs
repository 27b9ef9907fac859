use thiserror::Error;

/// Errors from database and commit operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("dataset {0:?} not found")]
    DatasetNotFound(String),

    #[error("value is not a commit")]
    NotACommit,

    #[error("commit parents do not include the current head of {0:?}")]
    NotAncestor(String),

    #[error("root contention persisted through {0} retries")]
    TooManyRetries(u32),

    #[error(transparent)]
    Value(#[from] quilt_values::ValueError),

    #[error(transparent)]
    Chunk(#[from] quilt_chunks::ChunkError),
}

pub type DataResult<T> = Result<T, DataError>;
