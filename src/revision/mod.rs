//! # Revisioning Policies
//!
//! A committed leaf is immutable; a later revision that touches the same
//! record page writes a new leaf holding only what that revision decided to
//! persist. Reading a page therefore means collecting a chain of historical
//! leaves (*snapshot leaves*, newest first) and combining them back into
//! one logically complete page. The policy decides both how long the chain
//! gets and how the combine works:
//!
//! | Policy            | Chain              | Combine                        |
//! |-------------------|--------------------|--------------------------------|
//! | `Full`            | 1 leaf             | newest leaf verbatim           |
//! | `Differential`    | diff + base        | union, diff wins               |
//! | `Incremental`     | up to the window   | fold, newer revision wins      |
//! | `SlidingSnapshot` | at most the window | fold, newer revision wins      |
//!
//! Ties go to the later revision. Tombstone records take part like any
//! other record, masking older values; the transaction layer turns them
//! into `None`.

use crate::page::KeyValuePage;
use crate::records::RecordSerializer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionPolicy {
    /// Every revision writes fully materialized leaves.
    Full,
    /// Each revision writes a diff against a periodic full dump.
    Differential,
    /// Each revision writes only what changed since the previous one.
    Incremental,
    /// Incremental, with a full write every `revisions_to_restore` steps so
    /// chains never exceed the window.
    SlidingSnapshot,
}

impl RevisionPolicy {
    /// Upper bound on the number of snapshot leaves to collect.
    pub fn leaves_to_collect(&self, revisions_to_restore: u32) -> usize {
        match self {
            RevisionPolicy::Full => 1,
            RevisionPolicy::Differential => (revisions_to_restore.max(1) as usize).min(2),
            RevisionPolicy::Incremental | RevisionPolicy::SlidingSnapshot => {
                revisions_to_restore.max(1) as usize
            }
        }
    }

    /// True when a freshly written leaf must carry the complete page
    /// instead of only the current revision's changes. Every non-full
    /// policy dumps a complete leaf each `revisions_to_restore` revisions
    /// so a reader's chain always terminates within its collection bound.
    pub fn writes_full_leaves(&self, revision: i32, revisions_to_restore: u32) -> bool {
        match self {
            RevisionPolicy::Full => true,
            RevisionPolicy::Differential
            | RevisionPolicy::Incremental
            | RevisionPolicy::SlidingSnapshot => {
                revisions_to_restore <= 1 || revision % revisions_to_restore as i32 == 0
            }
        }
    }

    /// Merges snapshot leaves (ordered newest first) into the logically
    /// complete page. The input must not be empty.
    pub fn combine<S: RecordSerializer>(
        &self,
        leaves: Vec<KeyValuePage<S>>,
    ) -> KeyValuePage<S> {
        debug_assert!(!leaves.is_empty(), "combine requires at least one leaf");
        let mut iter = leaves.into_iter();
        let mut combined = iter.next().expect("combine requires at least one leaf");
        match self {
            RevisionPolicy::Full => combined,
            RevisionPolicy::Differential => {
                // The newest leaf is the diff; the oldest collected leaf is
                // the base dump. Anything in between is ignored.
                if let Some(base) = iter.last() {
                    combined.merge_missing_from(&base);
                }
                combined
            }
            RevisionPolicy::Incremental | RevisionPolicy::SlidingSnapshot => {
                for older in iter {
                    combined.merge_missing_from(&older);
                }
                combined
            }
        }
    }
}
