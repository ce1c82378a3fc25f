//! Shared fixtures for the integration suites.

use stratadb::{
    IndexType, RawRecord, RawRecordSerializer, Resource, ResourceConfig, Revision, RevisionPolicy,
};

pub type RawResource = Resource<RawRecordSerializer>;

pub fn config(policy: RevisionPolicy) -> ResourceConfig<RawRecordSerializer> {
    ResourceConfig::new(RawRecordSerializer::default())
        .with_revision_policy(policy)
        .with_revisions_to_restore(3)
}

pub fn new_resource(dir: &std::path::Path, policy: RevisionPolicy) -> RawResource {
    Resource::create(dir.join("resource"), config(policy)).unwrap()
}

/// Commits one revision that upserts `puts` and tombstones `deletes`.
pub fn commit_revision(resource: &RawResource, puts: &[(u64, &str)], deletes: &[u64]) -> Revision {
    let mut txn = resource.begin_write().unwrap();
    for &(key, value) in puts {
        txn.put_record(
            RawRecord::new(key, value.as_bytes().to_vec()),
            IndexType::Document,
        )
        .unwrap();
    }
    for &key in deletes {
        txn.remove_record(key, IndexType::Document).unwrap();
    }
    txn.commit(None, None).unwrap()
}

/// Reads a document record as a UTF-8 string at `revision`.
pub fn read_at(resource: &RawResource, revision: Revision, key: u64) -> Option<String> {
    let mut txn = resource.begin_read(revision).unwrap();
    let record = txn.get_record(key, IndexType::Document).unwrap();
    record.map(|r| String::from_utf8(r.payload().to_vec()).unwrap())
}
