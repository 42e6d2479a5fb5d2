use crate::config::AppConfig;
use crate::error::{Result, TermbaseError};
use crate::model::{
    generate_internal_id, next_timepoint, BranchHead, BranchPath, BranchTimeslice, Commit,
    Timepoint,
};
use crate::store::search::{Clause, PageRequest, SearchQuery, Sort};
use crate::store::traits::{SearchEngine, LARGE_PAGE};
use log::{debug, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Branch lifecycle and the commit protocol.
///
/// All branch-document writes go through this service. The commit mutex
/// serializes the lock check inside [`BranchService::open_commit`], which is
/// what makes the branch lock safe without store-side transactions. That
/// protection only holds within a single process.
pub struct BranchService<S> {
    store: Arc<S>,
    commit_lock: Mutex<()>,
    config: AppConfig,
}

impl<S: SearchEngine> BranchService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, &AppConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: &AppConfig) -> Self {
        Self {
            store,
            commit_lock: Mutex::new(()),
            config: config.clone(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Create a branch. The root branch seeds its own timeline; every other
    /// branch starts at its parent's current head.
    pub async fn create_branch(&self, path: &BranchPath) -> Result<BranchTimeslice> {
        if self.load_current(path).await?.is_some() {
            return Err(TermbaseError::conflict(format!(
                "branch '{path}' already exists"
            )));
        }
        let timepoint = next_timepoint();
        let mut slice = BranchTimeslice::new(path.clone(), timepoint);
        if let Some(parent_path) = path.parent() {
            let parent = self.find_current(&parent_path).await?;
            slice.base = parent.head;
            slice.head = parent.head;
        }
        info!("creating branch {path}");
        self.store
            .save(BranchTimeslice::COLLECTION, serde_json::to_value(&slice)?)
            .await?;
        slice.update_state(slice.base);
        Ok(slice)
    }

    /// The current timeslice of a branch, with its state relative to the
    /// parent's current head.
    pub async fn find_current(&self, path: &BranchPath) -> Result<BranchTimeslice> {
        let mut slice = self
            .load_current(path)
            .await?
            .ok_or_else(|| TermbaseError::not_found(format!("branch '{path}'")))?;
        let parent_head = match path.parent() {
            Some(parent_path) => {
                let parent = self
                    .load_current(&parent_path)
                    .await?
                    .ok_or_else(|| {
                        TermbaseError::integrity(format!(
                            "branch '{path}' exists but its parent '{parent_path}' does not"
                        ))
                    })?;
                parent.head
            }
            None => slice.base,
        };
        slice.update_state(parent_head);
        Ok(slice)
    }

    async fn load_current(&self, path: &BranchPath) -> Result<Option<BranchTimeslice>> {
        let query = SearchQuery::new()
            .must(Clause::term("path", json!(path)))
            .must_not(Clause::exists("end"));
        let page = self
            .store
            .search(
                BranchTimeslice::COLLECTION,
                &query,
                &[],
                &PageRequest::of(2),
            )
            .await?;
        if page.total > 1 {
            return Err(TermbaseError::integrity(format!(
                "branch '{path}' has {} open timeslices, expected at most one",
                page.total
            )));
        }
        page.content
            .into_iter()
            .next()
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .transpose()
    }

    /// The timeslice whose `[start, end)` interval contains `timepoint`.
    pub async fn find_at_time(
        &self,
        path: &BranchPath,
        timepoint: Timepoint,
    ) -> Result<BranchTimeslice> {
        let query = SearchQuery::new()
            .must(Clause::term("path", json!(path)))
            .must(Clause::range_lte("start", json!(timepoint)))
            .must_not(Clause::range_lte("end", json!(timepoint)));
        let page = self
            .store
            .search(
                BranchTimeslice::COLLECTION,
                &query,
                &[],
                &PageRequest::of(2),
            )
            .await?;
        if page.total > 1 {
            return Err(TermbaseError::integrity(format!(
                "branch '{path}' has {} timeslices covering timepoint {timepoint}",
                page.total
            )));
        }
        let doc = page.content.into_iter().next().ok_or_else(|| {
            TermbaseError::not_found(format!("branch '{path}' at timepoint {timepoint}"))
        })?;
        Ok(serde_json::from_value(doc)?)
    }

    /// Open a commit against a branch, taking the branch lock. Fails with a
    /// conflict if the branch is already locked.
    pub async fn open_commit(&self, path: &BranchPath) -> Result<Commit> {
        let _guard = self.commit_lock.lock().await;
        let mut branch = self.find_current(path).await?;
        if branch.locked {
            return Err(TermbaseError::conflict(format!(
                "branch '{path}' is locked by another commit"
            )));
        }
        branch.locked = true;
        branch.lock_token = Some(generate_internal_id());
        self.store
            .save(BranchTimeslice::COLLECTION, serde_json::to_value(&branch)?)
            .await?;
        debug!("commit opened on {path}");
        Ok(Commit::new(branch))
    }

    /// Complete a commit: end-stamp the locked timeslice and open its
    /// successor in one atomic batch. The successor keeps the base, advances
    /// the head to the commit timepoint and carries the accumulated
    /// `versions_replaced` forward.
    ///
    /// The timeslice is re-read under the commit mutex and must still carry
    /// this commit's lock token; a commit whose lock was force-released in
    /// the meantime is rejected rather than allowed to end-stamp a timeslice
    /// it no longer owns.
    pub async fn complete_commit(&self, commit: Commit) -> Result<BranchTimeslice> {
        let _guard = self.commit_lock.lock().await;
        let (handle, timepoint, versions_replaced) = commit.into_parts();
        let mut old = self
            .load_current(&handle.path)
            .await?
            .ok_or_else(|| TermbaseError::not_found(format!("branch '{}'", handle.path)))?;
        if !old.locked || handle.lock_token.is_none() || old.lock_token != handle.lock_token {
            return Err(TermbaseError::conflict(format!(
                "commit on '{}' was superseded before completion",
                handle.path
            )));
        }
        let mut next = BranchTimeslice::new(old.path.clone(), timepoint);
        next.base = old.base;
        next.versions_replaced = old.versions_replaced.clone();
        next.add_versions_replaced(&versions_replaced);

        old.end = Some(timepoint);
        old.locked = false;
        old.lock_token = None;

        info!("commit completed on {} at {timepoint}", next.path);
        self.store
            .save_batch(
                BranchTimeslice::COLLECTION,
                vec![serde_json::to_value(&old)?, serde_json::to_value(&next)?],
            )
            .await?;
        Ok(next)
    }

    /// Abandon a commit, releasing the branch lock. Documents already staged
    /// in the store by this commit are the caller's problem; the timeslice
    /// head does not move, so they stay invisible. An abort whose lock was
    /// already taken over is a no-op.
    pub async fn abort_commit(&self, commit: Commit) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        let (handle, _, _) = commit.into_parts();
        let mut branch = self
            .load_current(&handle.path)
            .await?
            .ok_or_else(|| TermbaseError::not_found(format!("branch '{}'", handle.path)))?;
        if !branch.locked || branch.lock_token != handle.lock_token {
            warn!("commit on {} was superseded before its abort", handle.path);
            return Ok(());
        }
        branch.locked = false;
        branch.lock_token = None;
        warn!("commit aborted on {}", branch.path);
        self.store
            .save(BranchTimeslice::COLLECTION, serde_json::to_value(&branch)?)
            .await?;
        Ok(())
    }

    /// Administrative unlock for a branch whose commit died without
    /// completing or aborting.
    pub async fn force_unlock(&self, path: &BranchPath) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        let mut branch = self.find_current(path).await?;
        if !branch.locked {
            return Err(TermbaseError::conflict(format!(
                "branch '{path}' is not locked"
            )));
        }
        branch.locked = false;
        branch.lock_token = None;
        warn!("force unlocking branch {path}");
        self.store
            .save(BranchTimeslice::COLLECTION, serde_json::to_value(&branch)?)
            .await?;
        Ok(())
    }

    /// Rebase a branch onto its parent's current head. Rolls the timeslice
    /// over with `base` advanced to the parent head; the branch's own `head`
    /// is kept, so local content is preserved and a Diverged branch comes
    /// back as Ahead.
    pub async fn rebase_branch(&self, path: &BranchPath) -> Result<BranchTimeslice> {
        let parent_path = path
            .parent()
            .ok_or_else(|| TermbaseError::conflict("the root branch cannot be rebased"))?;
        let _guard = self.commit_lock.lock().await;
        let mut old = self.find_current(path).await?;
        if old.locked {
            return Err(TermbaseError::conflict(format!(
                "branch '{path}' is locked by an open commit"
            )));
        }
        let parent = self.find_current(&parent_path).await?;
        let timepoint = next_timepoint();

        let mut next = BranchTimeslice::new(path.clone(), timepoint);
        next.base = parent.head;
        next.head = old.head;
        next.versions_replaced = old.versions_replaced.clone();

        old.end = Some(timepoint);

        info!(
            "rebasing {path} onto {parent_path} head {} at {timepoint}",
            parent.head
        );
        self.store
            .save_batch(
                BranchTimeslice::COLLECTION,
                vec![serde_json::to_value(&old)?, serde_json::to_value(&next)?],
            )
            .await?;
        next.update_state(parent.head);
        Ok(next)
    }

    /// Current timeslices of every branch strictly below `path`, in path
    /// order, each with its derived state.
    pub async fn find_children(&self, path: &BranchPath) -> Result<Vec<BranchTimeslice>> {
        let prefix = format!("{path}/");
        let query = SearchQuery::new()
            .must(Clause::prefix("path", &prefix))
            .must_not(Clause::exists("end"));
        let page = self
            .store
            .search(
                BranchTimeslice::COLLECTION,
                &query,
                &[Sort::asc("path")],
                &PageRequest::of(LARGE_PAGE),
            )
            .await?;
        let mut children: Vec<BranchTimeslice> = page
            .content
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?;

        // Heads of the subtree root and every descendant, for state
        // derivation without per-child lookups.
        let mut heads: HashMap<BranchPath, Timepoint> = children
            .iter()
            .map(|slice| (slice.path.clone(), slice.head))
            .collect();
        let root = self.find_current(path).await?;
        heads.insert(root.path.clone(), root.head);

        for child in &mut children {
            let parent_head = child
                .path
                .parent()
                .and_then(|parent| heads.get(&parent).copied())
                .ok_or_else(|| {
                    TermbaseError::integrity(format!(
                        "branch '{}' has no parent inside the subtree of '{path}'",
                        child.path
                    ))
                })?;
            child.update_state(parent_head);
        }
        Ok(children)
    }

    /// Current timeslices of every branch, in path order. States are not
    /// derived here.
    pub async fn find_all_current(&self) -> Result<Vec<BranchTimeslice>> {
        let query = SearchQuery::new().must_not(Clause::exists("end"));
        let stream = self
            .store
            .stream(BranchTimeslice::COLLECTION, &query, &[Sort::asc("path")])
            .await?;
        stream
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .collect()
    }

    /// Whether a captured `(base, head)` snapshot still describes the
    /// branch's current timeslice.
    pub async fn is_branch_state_current(&self, snapshot: &BranchHead) -> Result<bool> {
        let current = self.find_current(&snapshot.path).await?;
        Ok(current.base == snapshot.base && current.head == snapshot.head)
    }
}
