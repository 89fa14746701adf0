use crate::file::FileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Duplicate key in unique index")]
    KeyDuplicate,

    #[error("Index entry not found")]
    EntryNotFound,

    #[error("Key size mismatch: expected {expected}, got {actual}")]
    KeySizeMismatch { expected: usize, actual: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
