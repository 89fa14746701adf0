use crate::file::FileError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid slot: page_no={0}, slot_no={1}")]
    InvalidSlot(i32, i32),

    #[error("No record at page_no={0}, slot_no={1}")]
    RecordNotFound(i32, i32),

    #[error("String of length {0} exceeds column width {1}")]
    StringOverflow(usize, usize),

    #[error("Incompatible types: {lhs} vs {rhs}")]
    IncompatibleType { lhs: String, rhs: String },

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Record size mismatch: expected {expected}, got {actual}")]
    RecordSizeMismatch { expected: usize, actual: usize },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
