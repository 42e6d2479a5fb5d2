use crate::error::Result;
use crate::logic::visibility::VersionScope;
use crate::model::{Commit, VersionedComponent};
use crate::store::search::{PageRequest, SearchQuery};
use crate::store::traits::{SearchEngine, LARGE_PAGE};
use log::debug;
use serde_json::Value;
use std::sync::Arc;

/// Writes versioned component documents within an open commit.
///
/// Saving a component supersedes the versions of the same logical component
/// currently visible to the commit's branch: a version on the same path gets
/// its `end` stamped at the commit timepoint, a version inherited from an
/// ancestor path is recorded in the commit's `versions_replaced` instead and
/// left untouched.
pub struct ComponentWriter<S> {
    store: Arc<S>,
}

impl<S: SearchEngine> ComponentWriter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn save_components<T: VersionedComponent>(
        &self,
        commit: &mut Commit,
        scope: &VersionScope,
        components: Vec<T>,
    ) -> Result<()> {
        let mut batch: Vec<Value> = Vec::new();
        for mut component in components {
            let mut query = SearchQuery::new();
            for clause in component.identity_clauses() {
                query.must.push(clause);
            }
            let query = scope.apply(query, T::COLLECTION);
            let existing = self
                .store
                .search(T::COLLECTION, &query, &[], &PageRequest::of(LARGE_PAGE))
                .await?;
            for doc in existing.content {
                let mut old: T = serde_json::from_value(doc)?;
                if old.version().path == *commit.path() {
                    old.version_mut().end = Some(commit.timepoint());
                    batch.push(serde_json::to_value(&old)?);
                } else {
                    commit.mark_version_replaced(T::COLLECTION, &old.version().internal_id);
                }
            }
            let version = component.version_mut();
            version.path = commit.path().clone();
            version.start = commit.timepoint();
            version.end = None;
            batch.push(serde_json::to_value(&component)?);
        }
        debug!(
            "saving {} document(s) to {} on {}",
            batch.len(),
            T::COLLECTION,
            commit.path()
        );
        self.store.save_batch(T::COLLECTION, batch).await
    }
}
