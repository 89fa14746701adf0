mod error;
mod external_sorter;

pub use error::{SortError, SortResult};
pub use external_sorter::ExternalSorter;
