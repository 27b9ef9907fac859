use thiserror::Error;

/// Errors from the block-store layer.
#[derive(Debug, Error)]
pub enum NbsError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed table or manifest data. Fatal; never retried.
    #[error("corrupt table data: {0}")]
    Corrupt(String),

    /// A transient backing-store failure. Retried up to a bounded count.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// A persistent backing-store failure.
    #[error("backend failure: {0}")]
    Backend(String),

    #[error("manifest serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out waiting for the manifest lock")]
    LockTimeout,
}

pub type NbsResult<T> = Result<T, NbsError>;

impl From<NbsError> for quilt_chunks::ChunkError {
    fn from(err: NbsError) -> Self {
        match err {
            NbsError::Io(e) => quilt_chunks::ChunkError::Io(e),
            other => quilt_chunks::ChunkError::Backend(other.to_string()),
        }
    }
}

/// Run `op` up to `1 + retries` times, retrying only on
/// [`NbsError::Transient`].
pub(crate) fn with_retry<T>(
    retries: u32,
    mut op: impl FnMut() -> NbsResult<T>,
) -> NbsResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(NbsError::Transient(reason)) if attempt < retries => {
                attempt += 1;
                tracing::debug!(attempt, %reason, "retrying transient backend failure");
            }
            other => return other,
        }
    }
}
