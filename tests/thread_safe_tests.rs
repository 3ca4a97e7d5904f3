#![cfg(feature = "arc")]
//! Shared-root reader tests for the `arc` feature.
//!
//! Because nodes are immutable and mutation produces new roots, readers on
//! any number of threads may traverse the same root, or different roots
//! sharing subtrees, without coordination.

use arbora::PersistentAvlTree;
use rstest::rstest;
use std::thread;

#[rstest]
fn test_tree_is_send_and_sync_with_arc() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<PersistentAvlTree<i32>>();
}

#[rstest]
fn test_concurrent_readers_share_one_root() {
    let tree: PersistentAvlTree<u64> = (0..1000).collect();
    let expected: u64 = (0..1000).sum();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let reader = tree.clone();
            thread::spawn(move || reader.iter().sum::<u64>())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[rstest]
fn test_writer_does_not_disturb_concurrent_readers() {
    let tree: PersistentAvlTree<u64> = (0..500).collect();

    let reader = tree.clone();
    let reading = thread::spawn(move || {
        let mut totals = Vec::new();
        for _ in 0..50 {
            totals.push(reader.iter().sum::<u64>());
        }
        totals
    });

    // Writer produces new versions from the same starting root.
    let mut version = tree.clone();
    for value in 500..600 {
        version = version.push_back(value);
    }

    let expected: u64 = (0..500).sum();
    for total in reading.join().unwrap() {
        assert_eq!(total, expected);
    }
    assert_eq!(version.len(), 600);
}
