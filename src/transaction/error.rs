use crate::file::FileError;
use crate::index::IndexError;
use crate::record::RecordError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Transaction {0} not found")]
    TxnNotFound(u64),

    #[error("Transaction {0} is not active")]
    NotActive(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type TxnResult<T> = Result<T, TxnError>;
