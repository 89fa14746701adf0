mod error;
mod heap_file;
mod heap_page;
mod rid;
mod schema;
mod value;

pub use error::{RecordError, RecordResult};
pub use heap_file::{HeapFile, HeapFileHeader, HeapScan};
pub use heap_page::HeapPage;
pub use rid::Rid;
pub use schema::{ColumnDef, TableSchema};
pub use value::{DataType, Value};
