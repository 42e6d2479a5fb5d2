pub mod memory;
pub mod search;
pub mod traits;

pub use memory::MemoryIndex;
pub use search::{Clause, PageRequest, SearchPage, SearchQuery, Sort, SortOrder};
pub use traits::{DocStream, SearchEngine, CLAUSE_LIMIT, LARGE_PAGE};
