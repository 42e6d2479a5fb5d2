pub mod branch;
pub mod commit;
pub mod common;
pub mod component;
pub mod path;
pub mod query_concept;

pub use branch::*;
pub use commit::*;
pub use common::*;
pub use component::*;
pub use path::*;
pub use query_concept::*;
