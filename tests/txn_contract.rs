//! # Transaction Contract Tests
//!
//! Cache coherence within one read transaction, the closed-transaction
//! contract, the single-writer rule, and read-your-writes on the write
//! side.

mod common;

use common::{commit_revision, new_resource};
use stratadb::error::{is_transaction_closed, storage_error};
use stratadb::{IndexType, RawRecord, RevisionPolicy, StorageError};
use tempfile::tempdir;

#[test]
fn repeated_reads_return_identical_records() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);
    let revision = commit_revision(&resource, &[(1, "stable"), (2, "two")], &[]);

    let mut txn = resource.begin_read(revision).unwrap();
    let first = txn.get_record(1, IndexType::Document).unwrap().unwrap();
    let second = txn.get_record(1, IndexType::Document).unwrap().unwrap();
    assert_eq!(first, second);
}

#[test]
fn clear_caches_preserves_equality() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);
    let revision = commit_revision(&resource, &[(1, "stable")], &[]);

    let mut txn = resource.begin_read(revision).unwrap();
    let before = txn.get_record(1, IndexType::Document).unwrap().unwrap();
    txn.clear_caches().unwrap();
    let after = txn.get_record(1, IndexType::Document).unwrap().unwrap();
    assert_eq!(before, after);
}

#[test]
fn every_operation_fails_after_close() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);
    let revision = commit_revision(&resource, &[(1, "x")], &[]);

    let mut txn = resource.begin_read(revision).unwrap();
    txn.close().unwrap();
    assert!(txn.is_closed());

    assert!(is_transaction_closed(
        &txn.get_record(1, IndexType::Document).unwrap_err()
    ));
    assert!(is_transaction_closed(&txn.uber_page().unwrap_err()));
    assert!(is_transaction_closed(&txn.revision_root().unwrap_err()));
    assert!(is_transaction_closed(&txn.revision().unwrap_err()));
    assert!(is_transaction_closed(&txn.name(0, 0).unwrap_err()));
    assert!(is_transaction_closed(&txn.raw_name(0, 0).unwrap_err()));
    assert!(is_transaction_closed(&txn.name_count(0, 0).unwrap_err()));
    assert!(is_transaction_closed(&txn.clear_caches().unwrap_err()));

    // Close is idempotent and infallible after the first success.
    txn.close().unwrap();
    txn.close().unwrap();
}

#[test]
fn binding_to_an_uncommitted_revision_fails() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);

    assert!(resource.begin_read(5).is_err());
    assert!(resource.begin_read(-1).is_err());
    assert!(resource.begin_read(0).is_ok());
}

#[test]
fn only_one_write_transaction_at_a_time() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);

    let first = resource.begin_write().unwrap();
    let err = resource.begin_write().unwrap_err();
    assert!(matches!(
        storage_error(&err),
        Some(StorageError::IllegalState { .. })
    ));

    drop(first);
    let second = resource.begin_write().unwrap();
    drop(second);
}

#[test]
fn write_transaction_reads_its_own_writes() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);
    commit_revision(&resource, &[(1, "committed"), (2, "kept")], &[]);

    let mut txn = resource.begin_write().unwrap();
    txn.put_record(RawRecord::new(1, b"pending".to_vec()), IndexType::Document)
        .unwrap();
    txn.remove_record(2, IndexType::Document).unwrap();

    let pending = txn.get_record(1, IndexType::Document).unwrap().unwrap();
    assert_eq!(pending.payload(), b"pending");
    assert_eq!(txn.get_record(2, IndexType::Document).unwrap(), None);
    // Untouched keys fall through to the previous revision.
    assert_eq!(txn.get_record(3, IndexType::Document).unwrap(), None);

    txn.abort().unwrap();
}

#[test]
fn disabled_index_families_are_rejected() {
    let dir = tempdir().unwrap();
    let resource = new_resource(dir.path(), RevisionPolicy::SlidingSnapshot);
    let revision = commit_revision(&resource, &[(1, "x")], &[]);

    let mut txn = resource.begin_read(revision).unwrap();
    let err = txn.get_record(1, IndexType::Path).unwrap_err();
    assert!(matches!(
        storage_error(&err),
        Some(StorageError::IllegalState { .. })
    ));
    let err = txn.get_record(1, IndexType::Cas).unwrap_err();
    assert!(matches!(
        storage_error(&err),
        Some(StorageError::IllegalState { .. })
    ));
}

#[test]
fn path_index_roundtrip_when_enabled() {
    let dir = tempdir().unwrap();
    let cfg = stratadb::ResourceConfig::new(stratadb::RawRecordSerializer::default())
        .with_revision_policy(RevisionPolicy::SlidingSnapshot)
        .with_indexes(stratadb::IndexSet::default().with_path().with_cas());
    let resource = stratadb::Resource::create(dir.path().join("resource"), cfg).unwrap();

    let mut txn = resource.begin_write().unwrap();
    txn.put_record(RawRecord::new(4, b"path entry".to_vec()), IndexType::Path)
        .unwrap();
    txn.put_record(RawRecord::new(4, b"cas entry".to_vec()), IndexType::Cas)
        .unwrap();
    txn.put_record(RawRecord::new(4, b"doc entry".to_vec()), IndexType::Document)
        .unwrap();
    let revision = txn.commit(None, None).unwrap();

    let mut read = resource.begin_read(revision).unwrap();
    assert_eq!(
        read.get_record(4, IndexType::Path).unwrap().unwrap().payload(),
        b"path entry"
    );
    assert_eq!(
        read.get_record(4, IndexType::Cas).unwrap().unwrap().payload(),
        b"cas entry"
    );
    assert_eq!(
        read.get_record(4, IndexType::Document)
            .unwrap()
            .unwrap()
            .payload(),
        b"doc entry"
    );
}
