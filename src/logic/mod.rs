pub mod branching;
pub mod components;
pub mod ecl_query;
pub mod lexical;
pub mod query;
pub mod visibility;

pub use branching::BranchService;
pub use components::ComponentWriter;
pub use ecl_query::EclQueryService;
pub use lexical::DescriptionSearch;
pub use query::{ConceptQuery, QueryService};
pub use visibility::VersionScope;
