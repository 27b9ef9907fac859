use thiserror::Error;

/// Errors from diffing and patch application.
#[derive(Debug, Error)]
pub enum DiffError {
    #[error(transparent)]
    Value(#[from] quilt_values::ValueError),

    #[error("patch cannot apply at {path}: {reason}")]
    BadPatch { path: String, reason: String },
}

pub type DiffResult<T> = Result<T, DiffError>;
