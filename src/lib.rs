pub mod config;
pub mod ecl;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

pub use config::AppConfig;
pub use error::{Result, TermbaseError};

// Export logic services
pub use logic::{
    BranchService, ComponentWriter, ConceptQuery, DescriptionSearch, EclQueryService,
    QueryService, VersionScope,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryIndex, SearchEngine};

/// Initialize logging for embedding binaries; safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
