mod buffer_manager;
mod error;
mod file_manager;

pub use buffer_manager::BufferManager;
pub use error::{FileError, FileResult};
pub use file_manager::{FileHandle, PagedFileManager};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Number of frames in the buffer pool
pub const BUFFER_POOL_SIZE: usize = 1024;

/// Page number within a file
pub type PageId = usize;
