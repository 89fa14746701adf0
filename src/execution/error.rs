use crate::file::FileError;
use crate::index::IndexError;
use crate::record::RecordError;
use crate::sort::SortError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Sort error: {0}")]
    Sort(#[from] SortError),

    #[error("Value count mismatch: expected {expected}, got {actual}")]
    InvalidValueCount { expected: usize, actual: usize },

    #[error("Column {0} not found")]
    ColumnNotFound(String),

    #[error("Column {0} is ambiguous")]
    AmbiguousColumn(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type QueryResult<T> = Result<T, QueryError>;
