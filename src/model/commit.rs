use crate::model::{next_timepoint, BranchPath, BranchTimeslice, Timepoint};
use std::collections::{HashMap, HashSet};

/// A write transaction bound to exactly one locked branch timeslice.
///
/// Accumulates the version keys of documents its writes supersede; on
/// completion the branch service produces exactly one new timeslice and ends
/// the old one atomically. The handle is consumed by completion and dropped
/// on abort.
#[derive(Debug, Clone)]
pub struct Commit {
    branch: BranchTimeslice,
    timepoint: Timepoint,
    entity_versions_replaced: HashMap<String, HashSet<String>>,
}

impl Commit {
    pub(crate) fn new(branch: BranchTimeslice) -> Self {
        Self {
            branch,
            timepoint: next_timepoint(),
            entity_versions_replaced: HashMap::new(),
        }
    }

    pub fn path(&self) -> &BranchPath {
        &self.branch.path
    }

    pub fn timepoint(&self) -> Timepoint {
        self.timepoint
    }

    /// The locked timeslice this commit was opened against.
    pub fn branch(&self) -> &BranchTimeslice {
        &self.branch
    }

    /// Record that a write within this commit supersedes an existing document
    /// version from an ancestor branch.
    pub fn mark_version_replaced(&mut self, collection: &str, internal_id: &str) {
        self.entity_versions_replaced
            .entry(collection.to_string())
            .or_default()
            .insert(internal_id.to_string());
    }

    pub fn entity_versions_replaced(&self) -> &HashMap<String, HashSet<String>> {
        &self.entity_versions_replaced
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        BranchTimeslice,
        Timepoint,
        HashMap<String, HashSet<String>>,
    ) {
        (self.branch, self.timepoint, self.entity_versions_replaced)
    }
}
