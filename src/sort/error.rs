use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SortError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Record size mismatch: expected {expected}, got {actual}")]
    RecordSizeMismatch { expected: usize, actual: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type SortResult<T> = Result<T, SortError>;
