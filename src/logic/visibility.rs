use crate::error::{Result, TermbaseError};
use crate::logic::branching::BranchService;
use crate::model::{BranchPath, Timepoint};
use crate::store::search::{Clause, SearchQuery};
use crate::store::traits::SearchEngine;
use serde_json::json;
use std::collections::{HashMap, HashSet};

/// The set of document versions visible from one branch position.
///
/// A branch sees its own documents up to its head, its parent's documents up
/// to the branch base, the grandparent's up to the parent's base at that
/// time, and so on to the root. Versions recorded as replaced anywhere along
/// the chain are subtracted.
#[derive(Debug, Clone)]
pub struct VersionScope {
    path: BranchPath,
    /// One `(path, cutoff)` pair per chain level, child first.
    levels: Vec<(BranchPath, Timepoint)>,
    /// Superseded version keys per collection.
    excluded: HashMap<String, HashSet<String>>,
    /// Exclusion lists wider than this are split into several must_not
    /// clauses.
    clause_limit: usize,
}

impl VersionScope {
    /// Scope of a branch's current position.
    pub async fn for_branch<S: SearchEngine>(
        branches: &BranchService<S>,
        path: &BranchPath,
    ) -> Result<Self> {
        let slice = branches.find_current(path).await?;
        Self::build(branches, slice.path.clone(), slice.head, slice).await
    }

    /// Scope of a branch as it was at `timepoint`.
    pub async fn at_time<S: SearchEngine>(
        branches: &BranchService<S>,
        path: &BranchPath,
        timepoint: Timepoint,
    ) -> Result<Self> {
        let slice = branches.find_at_time(path, timepoint).await?;
        Self::build(branches, slice.path.clone(), timepoint, slice).await
    }

    async fn build<S: SearchEngine>(
        branches: &BranchService<S>,
        path: BranchPath,
        cutoff: Timepoint,
        mut slice: crate::model::BranchTimeslice,
    ) -> Result<Self> {
        let limit = branches.config().limits.recursion_limit;
        let mut levels = Vec::new();
        let mut excluded: HashMap<String, HashSet<String>> = HashMap::new();
        let mut level_path = path.clone();
        let mut level_cutoff = cutoff;
        loop {
            if levels.len() as u32 >= limit {
                log::error!("parent chain of {} exceeds {} levels", path, limit);
                return Err(TermbaseError::RecursionLimitExceeded {
                    limit,
                    context: format!("walking the parent chain of branch {}", path),
                });
            }
            levels.push((level_path.clone(), level_cutoff));
            for (collection, ids) in &slice.versions_replaced {
                excluded
                    .entry(collection.clone())
                    .or_default()
                    .extend(ids.iter().cloned());
            }
            let Some(parent_path) = level_path.parent() else {
                break;
            };
            // The parent's content is frozen at this level's base; the slice
            // that was current then carries the base for the next level up.
            level_cutoff = slice.base;
            slice = branches.find_at_time(&parent_path, level_cutoff).await?;
            level_path = parent_path;
        }
        Ok(Self {
            path,
            levels,
            excluded,
            clause_limit: branches.config().search.clause_limit,
        })
    }

    pub fn path(&self) -> &BranchPath {
        &self.path
    }

    /// Narrow a query to the documents this scope can see.
    pub fn apply(&self, mut query: SearchQuery, collection: &str) -> SearchQuery {
        let level_clauses: Vec<Clause> = self
            .levels
            .iter()
            .map(|(path, cutoff)| {
                Clause::Sub(
                    SearchQuery::new()
                        .must(Clause::term("path", json!(path)))
                        .must(Clause::range_lte("start", json!(cutoff)))
                        .must_not(Clause::range_lte("end", json!(cutoff))),
                )
            })
            .collect();
        query.must.push(Clause::Sub(SearchQuery {
            must: Vec::new(),
            must_not: Vec::new(),
            should: level_clauses,
        }));
        if let Some(ids) = self.excluded.get(collection) {
            let mut sorted: Vec<&String> = ids.iter().collect();
            sorted.sort();
            for chunk in sorted.chunks(self.clause_limit) {
                query.must_not.push(Clause::terms(
                    "_id",
                    chunk.iter().map(|id| json!(id)).collect(),
                ));
            }
        }
        query
    }
}
