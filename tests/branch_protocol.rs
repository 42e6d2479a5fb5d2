use proptest::prelude::*;
use std::sync::Arc;
use termbase::store::search::{Clause, PageRequest, SearchQuery};
use termbase::store::SearchEngine;
use termbase::{
    BranchPath, BranchService, BranchState, BranchTimeslice, MemoryIndex, TermbaseError,
};

fn setup() -> (Arc<MemoryIndex>, BranchService<MemoryIndex>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(MemoryIndex::new());
    let branches = BranchService::new(store.clone());
    (store, branches)
}

async fn all_slices(store: &MemoryIndex, path: &BranchPath) -> Vec<BranchTimeslice> {
    let query = SearchQuery::new().must(Clause::term("path", serde_json::json!(path)));
    store
        .search(
            BranchTimeslice::COLLECTION,
            &query,
            &[termbase::store::Sort::asc("start")],
            &PageRequest::of(1000),
        )
        .await
        .unwrap()
        .content
        .into_iter()
        .map(|doc| serde_json::from_value(doc).unwrap())
        .collect()
}

/// Timeslices of one branch must partition time: sorted by start, each
/// closed slice ends exactly where the next begins, and only the last is
/// open.
fn assert_partition(slices: &[BranchTimeslice]) {
    assert!(!slices.is_empty());
    for pair in slices.windows(2) {
        assert_eq!(pair[0].end, Some(pair[1].start));
    }
    for slice in &slices[..slices.len() - 1] {
        assert!(slice.end.is_some());
    }
    assert!(slices.last().unwrap().end.is_none());
}

#[tokio::test]
async fn commit_lifecycle_partitions_the_timeline() {
    let (store, branches) = setup();
    let root = BranchPath::root();
    branches.create_branch(&root).await.unwrap();

    for _ in 0..5 {
        let commit = branches.open_commit(&root).await.unwrap();
        branches.complete_commit(commit).await.unwrap();
    }

    let slices = all_slices(&store, &root).await;
    assert_eq!(slices.len(), 6);
    assert_partition(&slices);

    // Every historical point resolves to exactly the slice containing it.
    for slice in &slices {
        let found = branches.find_at_time(&root, slice.start).await.unwrap();
        assert_eq!(found.internal_id, slice.internal_id);
    }
}

#[tokio::test]
async fn branch_states_track_parent_and_local_commits() {
    let (_, branches) = setup();
    let root = BranchPath::root();
    let task = BranchPath::new("MAIN/TASK").unwrap();
    branches.create_branch(&root).await.unwrap();
    branches.create_branch(&task).await.unwrap();

    let state = |b: &BranchTimeslice| b.state.unwrap();
    assert_eq!(
        state(&branches.find_current(&task).await.unwrap()),
        BranchState::UpToDate
    );

    let commit = branches.open_commit(&root).await.unwrap();
    branches.complete_commit(commit).await.unwrap();
    assert_eq!(
        state(&branches.find_current(&task).await.unwrap()),
        BranchState::Behind
    );

    let commit = branches.open_commit(&task).await.unwrap();
    branches.complete_commit(commit).await.unwrap();
    assert_eq!(
        state(&branches.find_current(&task).await.unwrap()),
        BranchState::Diverged
    );

    // Rebasing advances the base onto the parent head but keeps content.
    let rebased = branches.rebase_branch(&task).await.unwrap();
    assert_eq!(rebased.state.unwrap(), BranchState::Ahead);

    // A branch with no local commits rebases back to up to date.
    let quiet = BranchPath::new("MAIN/QUIET").unwrap();
    branches.create_branch(&quiet).await.unwrap();
    let commit = branches.open_commit(&root).await.unwrap();
    branches.complete_commit(commit).await.unwrap();
    let rebased = branches.rebase_branch(&quiet).await.unwrap();
    assert_eq!(rebased.state.unwrap(), BranchState::UpToDate);
}

#[tokio::test]
async fn locking_is_first_writer_wins() {
    let (_, branches) = setup();
    let root = BranchPath::root();
    branches.create_branch(&root).await.unwrap();

    let held = branches.open_commit(&root).await.unwrap();
    for _ in 0..3 {
        assert!(matches!(
            branches.open_commit(&root).await.unwrap_err(),
            TermbaseError::Conflict(_)
        ));
    }
    branches.complete_commit(held).await.unwrap();
    assert!(branches.open_commit(&root).await.is_ok());
}

/// A commit that lost its lock to force_unlock must not complete after a new
/// commit has taken over, or the branch would end up with two open slices.
#[tokio::test]
async fn force_unlock_fences_out_the_stale_commit() {
    let (store, branches) = setup();
    let root = BranchPath::root();
    branches.create_branch(&root).await.unwrap();

    let zombie = branches.open_commit(&root).await.unwrap();
    branches.force_unlock(&root).await.unwrap();
    let fresh = branches.open_commit(&root).await.unwrap();

    assert!(matches!(
        branches.complete_commit(zombie).await.unwrap_err(),
        TermbaseError::Conflict(_)
    ));
    branches.complete_commit(fresh).await.unwrap();

    let slices = all_slices(&store, &root).await;
    assert_eq!(slices.len(), 2);
    assert_partition(&slices);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_always_see_exactly_one_current_slice() {
    let (_, branches) = setup();
    let branches = Arc::new(branches);
    let root = BranchPath::root();
    branches.create_branch(&root).await.unwrap();

    let reader = {
        let branches = branches.clone();
        let root = root.clone();
        tokio::spawn(async move {
            // find_current fails if a commit ever leaves zero or two open
            // slices visible.
            for _ in 0..500 {
                branches.find_current(&root).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    for _ in 0..50 {
        let commit = branches.open_commit(&root).await.unwrap();
        branches.complete_commit(commit).await.unwrap();
    }
    reader.await.unwrap();
}

#[derive(Debug, Clone)]
enum Op {
    Commit(usize),
    Rebase(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3).prop_map(Op::Commit),
        (1usize..3).prop_map(Op::Rebase),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any interleaving of commits and rebases keeps each branch timeline a
    /// partition with exactly one open slice, and the root's head always at
    /// or beyond every descendant base.
    #[test]
    fn random_histories_keep_timeline_invariants(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let (store, branches) = setup();
            let paths = [
                BranchPath::root(),
                BranchPath::new("MAIN/A").unwrap(),
                BranchPath::new("MAIN/A/B").unwrap(),
            ];
            for path in &paths {
                branches.create_branch(path).await.unwrap();
            }

            for op in ops {
                match op {
                    Op::Commit(i) => {
                        let commit = branches.open_commit(&paths[i]).await.unwrap();
                        branches.complete_commit(commit).await.unwrap();
                    }
                    Op::Rebase(i) => {
                        branches.rebase_branch(&paths[i]).await.unwrap();
                    }
                }
            }

            for path in &paths {
                let slices = all_slices(&store, path).await;
                assert_partition(&slices);
                let current = branches.find_current(path).await.unwrap();
                // Heads never outrun the rollover that produced the slice.
                assert!(current.head <= current.start);
                assert!(current.base <= current.start);
                if let Some(parent) = path.parent() {
                    let parent_current = branches.find_current(&parent).await.unwrap();
                    assert!(current.base <= parent_current.head);
                }
            }
        });
    }
}
