//! Checkpoint store integration harness.
//!
//! # What this covers
//!
//! - Round-trip across store instances, as across a process restart.
//! - The monotonic rule: a commit with a lower line number is a no-op.
//! - Rename atomicity: no temp files survive a commit.
//! - Property: any committed `(offset, line)` pair resumes verbatim.
//!
//! # Running
//!
//! ```sh
//! cargo test --test checkpoint_harness
//! ```

mod common;

use proptest::prelude::*;
use sml_core::checkpoint::CheckpointStore;
use sml_core::identity::identify;

#[test]
fn resume_survives_a_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("x.log");
    std::fs::write(&file, "line\n").unwrap();
    let identity = identify(&file).unwrap();

    {
        let store = CheckpointStore::open(dir.path().join("cp"), ".cp").unwrap();
        store.commit(&identity, &file, 120, 12).unwrap();
    }

    // A fresh instance over the same directory — the restart case.
    let store = CheckpointStore::open(dir.path().join("cp"), ".cp").unwrap();
    assert_eq!(store.resume(&identity), (120, 12));
}

#[test]
fn commits_leave_no_temp_files_behind() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("x.log");
    std::fs::write(&file, "line\n").unwrap();
    let identity = identify(&file).unwrap();

    let cp_dir = dir.path().join("cp");
    let store = CheckpointStore::open(&cp_dir, ".cp").unwrap();
    for n in 1..=20u64 {
        store.commit(&identity, &file, n * 10, n).unwrap();
    }

    let names: Vec<String> = std::fs::read_dir(&cp_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 1, "expected one document, got {names:?}");
    assert!(names[0].ends_with(".cp"));
}

#[test]
fn reset_forgets_the_monotonic_floor() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("x.log");
    std::fs::write(&file, "line\n").unwrap();
    let identity = identify(&file).unwrap();

    let store = CheckpointStore::open(dir.path().join("cp"), ".cp").unwrap();
    store.commit(&identity, &file, 500, 50).unwrap();
    store.commit(&identity, &file, 10, 1).unwrap();
    assert_eq!(store.resume(&identity), (500, 50));

    store.reset(&identity);
    store.commit(&identity, &file, 10, 1).unwrap();
    assert_eq!(store.resume(&identity), (10, 1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_committed_pair_resumes_verbatim(offset in 0u64..1 << 40, line in 0u64..1 << 32) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.log");
        std::fs::write(&file, "line\n").unwrap();
        let identity = identify(&file).unwrap();

        let store = CheckpointStore::open(dir.path().join("cp"), ".cp").unwrap();
        store.commit(&identity, &file, offset, line).unwrap();
        prop_assert_eq!(store.resume(&identity), (offset, line));
    }

    #[test]
    fn later_commits_win_only_when_monotonic(
        first in 0u64..1 << 20,
        second in 0u64..1 << 20,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.log");
        std::fs::write(&file, "line\n").unwrap();
        let identity = identify(&file).unwrap();

        let store = CheckpointStore::open(dir.path().join("cp"), ".cp").unwrap();
        store.commit(&identity, &file, first * 10, first).unwrap();
        store.commit(&identity, &file, second * 10, second).unwrap();

        let expected = if second >= first { second } else { first };
        prop_assert_eq!(store.resume(&identity), (expected * 10, expected));
    }
}
