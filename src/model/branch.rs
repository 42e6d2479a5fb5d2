use crate::model::{generate_internal_id, BranchPath, Timepoint};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Classification of a branch relative to its parent, derived from the
/// branch's `base`/`head` timestamps and the parent's current `head`.
/// Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchState {
    UpToDate,
    Ahead,
    Behind,
    Diverged,
}

impl BranchState {
    pub fn derive(base: Timepoint, head: Timepoint, parent_head: Timepoint) -> BranchState {
        let parent_ahead = parent_head > base;
        let this_ahead = head > base;
        match (parent_ahead, this_ahead) {
            (true, true) => BranchState::Diverged,
            (true, false) => BranchState::Behind,
            (false, true) => BranchState::Ahead,
            (false, false) => BranchState::UpToDate,
        }
    }
}

/// One interval of a branch's existence.
///
/// A branch is a sequence of timeslices; exactly one per path may have
/// `end == None` (the current one). Timeslices are append-only history:
/// they are mutated only by the owning commit and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchTimeslice {
    #[serde(rename = "_id")]
    pub internal_id: String,
    pub path: BranchPath,
    /// Timestamp inherited from the parent at creation or rebase.
    pub base: Timepoint,
    pub start: Timepoint,
    /// Time of the last content change on this branch.
    pub head: Timepoint,
    /// `None` marks the current timeslice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timepoint>,
    pub locked: bool,
    /// Fresh token issued by the holding commit. Completion must present the
    /// matching token, which fences out commits whose lock was taken over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_token: Option<String>,
    /// Document version keys superseded by writes on this branch, per entity
    /// collection. Carried forward on every rollover; used for rollback/diff
    /// and excluded from ancestor visibility.
    #[serde(default)]
    pub versions_replaced: HashMap<String, HashSet<String>>,
    /// Derived on read, never stored.
    #[serde(skip)]
    pub state: Option<BranchState>,
}

impl BranchTimeslice {
    pub const COLLECTION: &'static str = "branches";

    pub fn new(path: BranchPath, timepoint: Timepoint) -> Self {
        Self {
            internal_id: generate_internal_id(),
            path,
            base: timepoint,
            start: timepoint,
            head: timepoint,
            end: None,
            locked: false,
            lock_token: None,
            versions_replaced: HashMap::new(),
            state: None,
        }
    }

    pub fn is_current(&self) -> bool {
        self.end.is_none()
    }

    /// Whether `[start, end)` contains `t`, treating a missing end as +inf.
    pub fn contains(&self, t: Timepoint) -> bool {
        self.start <= t && self.end.map_or(true, |end| t < end)
    }

    pub fn update_state(&mut self, parent_head: Timepoint) {
        self.state = Some(BranchState::derive(self.base, self.head, parent_head));
    }

    pub fn add_versions_replaced(&mut self, other: &HashMap<String, HashSet<String>>) {
        for (entity_type, ids) in other {
            self.versions_replaced
                .entry(entity_type.clone())
                .or_default()
                .extend(ids.iter().cloned());
        }
    }

    pub fn head_snapshot(&self) -> BranchHead {
        BranchHead {
            path: self.path.clone(),
            base: self.base,
            head: self.head,
        }
    }
}

/// A captured `(base, head)` snapshot used to detect whether derived state
/// (for example a cached query result) has gone stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHead {
    pub path: BranchPath,
    pub base: Timepoint,
    pub head: Timepoint,
}
