use crate::error::Result;
use crate::store::search::{PageRequest, SearchPage, SearchQuery, Sort};
use async_trait::async_trait;
use serde_json::Value;

/// Hard ceiling on the number of values a single `Terms` clause may carry.
/// Callers batching id filters must chunk at this size.
pub const CLAUSE_LIMIT: usize = 800;

/// Page size used for internal bulk reads.
pub const LARGE_PAGE: usize = 10_000;

/// Iterator over every document matching a query, in sort order. Backed by a
/// snapshot taken when the stream is opened, so concurrent writes do not
/// affect an open stream.
pub type DocStream = Box<dyn Iterator<Item = Value> + Send>;

/// Document store and query surface shared by every service in the crate.
/// Documents are JSON objects keyed by their `_id` field within a named
/// collection.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Insert or replace one document by `_id`.
    async fn save(&self, collection: &str, doc: Value) -> Result<()>;

    /// Insert or replace a batch atomically. Either every document is
    /// visible to subsequent reads or none is.
    async fn save_batch(&self, collection: &str, docs: Vec<Value>) -> Result<()>;

    /// Run a boolean query, sorted then paged.
    async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
        sort: &[Sort],
        page: &PageRequest,
    ) -> Result<SearchPage<Value>>;

    /// Stream every match in sort order from a point-in-time snapshot.
    async fn stream(
        &self,
        collection: &str,
        query: &SearchQuery,
        sort: &[Sort],
    ) -> Result<DocStream>;
}
