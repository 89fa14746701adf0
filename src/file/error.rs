use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(usize),

    #[error("Page does not exist: page_no={0}")]
    PageNotExist(usize),

    #[error("Page is not in the buffer pool: page_no={0}")]
    PageNotCached(usize),

    #[error("Page is not pinned: page_no={0}")]
    PageNotPinned(usize),

    #[error("Page is still pinned: page_no={0}")]
    PagePinned(usize),

    #[error("All buffer pool frames are pinned")]
    BufferPoolExhausted,

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("File handle limit reached")]
    TooManyOpenFiles,
}

pub type FileResult<T> = Result<T, FileError>;
