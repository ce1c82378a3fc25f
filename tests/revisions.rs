//! # Multi-Revision Read Tests
//!
//! End-to-end coverage of the revisioned read path: records written across
//! several commits must combine back into the correct logical state under
//! every revisioning policy, historical revisions must stay readable, and
//! deletions must mask older values from their revision on.

mod common;

use common::{commit_revision, new_resource, read_at};
use stratadb::{IndexType, RawRecord, RevisionPolicy};
use tempfile::tempdir;

const POLICIES: [RevisionPolicy; 4] = [
    RevisionPolicy::Full,
    RevisionPolicy::Differential,
    RevisionPolicy::Incremental,
    RevisionPolicy::SlidingSnapshot,
];

#[test]
fn bootstrap_revision_is_empty_and_readable() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);

    assert_eq!(resource.latest_revision().unwrap(), 0);
    assert_eq!(read_at(&resource, 0, 1), None);
}

#[test]
fn write_then_delete_across_revisions() {
    for policy in POLICIES {
        let dir = tempdir().unwrap();
        let resource = new_resource(dir.path(), policy);

        let r1 = commit_revision(&resource, &[(1, "A")], &[]);
        let r2 = commit_revision(&resource, &[(2, "B")], &[]);
        let r3 = commit_revision(&resource, &[], &[1]);

        assert_eq!(read_at(&resource, r3, 1), None, "{policy:?}");
        assert_eq!(read_at(&resource, r3, 2).as_deref(), Some("B"), "{policy:?}");

        // Historical revisions are unaffected by later commits.
        assert_eq!(read_at(&resource, r1, 1).as_deref(), Some("A"), "{policy:?}");
        assert_eq!(read_at(&resource, r1, 2), None, "{policy:?}");
        assert_eq!(read_at(&resource, r2, 1).as_deref(), Some("A"), "{policy:?}");
        assert_eq!(read_at(&resource, r2, 2).as_deref(), Some("B"), "{policy:?}");
    }
}

#[test]
fn updates_shadow_older_values() {
    for policy in POLICIES {
        let dir = tempdir().unwrap();
        let resource = new_resource(dir.path(), policy);

        commit_revision(&resource, &[(7, "v1")], &[]);
        commit_revision(&resource, &[(7, "v2")], &[]);
        let r3 = commit_revision(&resource, &[(7, "v3")], &[]);

        assert_eq!(read_at(&resource, r3, 7).as_deref(), Some("v3"), "{policy:?}");
    }
}

#[test]
fn chains_longer_than_the_restore_window_stay_complete() {
    // revisions_to_restore is 3; key 1 is written once and then left
    // untouched for many revisions touching the same page.
    for policy in POLICIES {
        let dir = tempdir().unwrap();
        let resource = new_resource(dir.path(), policy);

        commit_revision(&resource, &[(1, "keep")], &[]);
        let mut last = 0;
        for n in 0..8u64 {
            last = commit_revision(&resource, &[(2, &format!("n{n}"))], &[]);
        }

        assert_eq!(read_at(&resource, last, 1).as_deref(), Some("keep"), "{policy:?}");
        assert_eq!(read_at(&resource, last, 2).as_deref(), Some("n7"), "{policy:?}");
    }
}

#[test]
fn keys_spread_across_record_pages_and_trie_levels() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);

    // 0 and 511 share a leaf; the rest force distinct leaves and deeper
    // trie paths.
    let keys = [0u64, 511, 512, 70_000, 3_000_000];
    let puts: Vec<(u64, String)> = keys.iter().map(|&k| (k, format!("val-{k}"))).collect();
    let put_refs: Vec<(u64, &str)> = puts.iter().map(|(k, v)| (*k, v.as_str())).collect();
    let revision = commit_revision(&resource, &put_refs, &[]);

    for &key in &keys {
        assert_eq!(
            read_at(&resource, revision, key).as_deref(),
            Some(format!("val-{key}").as_str())
        );
    }
    assert_eq!(read_at(&resource, revision, 1), None);
    assert_eq!(read_at(&resource, revision, 70_001), None);
}

#[test]
fn oversized_records_survive_commit_and_reopen() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);

    let big = vec![0xB7u8; stratadb::config::constants::MAX_RECORD_SIZE + 100];
    let mut txn = resource.begin_write().unwrap();
    txn.put_record(RawRecord::new(5, big.clone()), IndexType::Document)
        .unwrap();
    txn.put_record(RawRecord::new(6, b"small".to_vec()), IndexType::Document)
        .unwrap();
    let revision = txn.commit(None, None).unwrap();

    let mut read = resource.begin_read(revision).unwrap();
    let record = read.get_record(5, IndexType::Document).unwrap().unwrap();
    assert_eq!(record.payload(), big.as_slice());
    assert_eq!(
        read.get_record(6, IndexType::Document)
            .unwrap()
            .unwrap()
            .payload(),
        b"small"
    );

    // A second resource handle over the same directory sees the same data.
    drop(read);
    let reopened = stratadb::Resource::open(
        dir.path().join("resource"),
        common::config(RevisionPolicy::SlidingSnapshot),
    )
    .unwrap();
    let mut read = reopened.begin_read(revision).unwrap();
    let record = read.get_record(5, IndexType::Document).unwrap().unwrap();
    assert_eq!(record.payload(), big.as_slice());
}

#[test]
fn names_are_interned_per_revision() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);

    let mut txn = resource.begin_write().unwrap();
    let title = txn.create_name("title", 0);
    let title_again = txn.create_name("title", 0);
    let attr = txn.create_name("lang", 1);
    assert_eq!(title, title_again);
    let revision = txn.commit(None, None).unwrap();

    let read = resource.begin_read(revision).unwrap();
    assert_eq!(read.name(title, 0).unwrap(), Some("title"));
    assert_eq!(read.raw_name(attr, 1).unwrap(), Some(b"lang".as_slice()));
    assert_eq!(read.name_count(title, 0).unwrap(), 2);
    assert_eq!(read.name(title, 1).unwrap(), None);
}

#[test]
fn commit_metadata_is_recorded() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);

    let mut txn = resource.begin_write().unwrap();
    txn.put_record(RawRecord::new(1, b"x".to_vec()), IndexType::Document)
        .unwrap();
    let revision = txn
        .commit(Some("ana".to_string()), Some("first data".to_string()))
        .unwrap();

    let read = resource.begin_read(revision).unwrap();
    let root = read.revision_root().unwrap();
    assert_eq!(root.revision(), revision);
    assert_eq!(root.author(), Some("ana"));
    assert_eq!(root.commit_message(), Some("first data"));
    assert!(root.commit_timestamp_millis() > 0);
    assert_eq!(root.max_node_key(), 1);
}

#[test]
fn tombstone_then_rewrite_restores_the_key() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::Incremental);

    commit_revision(&resource, &[(9, "first")], &[]);
    let gone = commit_revision(&resource, &[], &[9]);
    let back = commit_revision(&resource, &[(9, "second")], &[]);

    assert_eq!(read_at(&resource, gone, 9), None);
    assert_eq!(read_at(&resource, back, 9).as_deref(), Some("second"));
}
