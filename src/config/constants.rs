//! # StrataDB Configuration Constants
//!
//! Centralizes the constants that define the on-disk layout and the
//! transaction-side cache bounds. Constants that depend on each other are
//! co-located, with compile-time assertions guarding the derivations.
//!
//! ## Dependency Graph
//!
//! ```text
//! NDP_NODE_COUNT_EXPONENT (9)
//!       │
//!       ├─> NDP_NODE_COUNT (derived: 1 << 9 = 512)
//!       │     A record page covers this many contiguous node-key slots;
//!       │     the slot/overflow bitsets in a leaf are exactly this wide.
//!       │
//!       └─> INP_REFERENCE_COUNT (512, kept equal so one trie level
//!             consumes the same number of key bits as one leaf)
//!
//! PAGE_SIZE (1 MiB)
//!       │
//!       └─> MAX_RECORD_SIZE (derived: PAGE_SIZE - PAGE_FIXED_HEADER_SIZE)
//!             Records whose serialized payload exceeds this spill into a
//!             dedicated overflow page; only the reference stays inline.
//!
//! INP_LEVEL_PAGE_COUNT_EXPONENT ([27, 18, 9, 0])
//!       │
//!       └─> Four trie levels of 9 bits each: record-page keys up to 2^36
//!           are addressable before UnsupportedKey fires.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `NDP_NODE_COUNT == 1 << NDP_NODE_COUNT_EXPONENT`
//! 2. `MAX_RECORD_SIZE == PAGE_SIZE - PAGE_FIXED_HEADER_SIZE`
//! 3. Adjacent trie-level exponents differ by `INP_REFERENCE_COUNT_EXPONENT`

// ============================================================================
// RECORD PAGE GEOMETRY
// ============================================================================

/// log2 of the number of node-key slots a record page covers.
pub const NDP_NODE_COUNT_EXPONENT: u32 = 9;

/// Number of contiguous node-key slots per record page.
pub const NDP_NODE_COUNT: usize = 1 << NDP_NODE_COUNT_EXPONENT;

const _: () = assert!(
    NDP_NODE_COUNT == 1 << NDP_NODE_COUNT_EXPONENT,
    "NDP_NODE_COUNT derivation mismatch"
);

// ============================================================================
// INDIRECT TRIE GEOMETRY
// ============================================================================

/// log2 of the reference fanout of one indirect page.
pub const INP_REFERENCE_COUNT_EXPONENT: u32 = 9;

/// Reference fanout of one indirect page.
pub const INP_REFERENCE_COUNT: usize = 1 << INP_REFERENCE_COUNT_EXPONENT;

/// Default per-level shift amounts for the indirect tries. Each level
/// consumes `INP_REFERENCE_COUNT_EXPONENT` key bits, most significant first.
pub const INP_LEVEL_PAGE_COUNT_EXPONENT: [u8; 4] = [27, 18, 9, 0];

const _: () = assert!(
    INP_LEVEL_PAGE_COUNT_EXPONENT[0] as u32
        == INP_LEVEL_PAGE_COUNT_EXPONENT[1] as u32 + INP_REFERENCE_COUNT_EXPONENT
        && INP_LEVEL_PAGE_COUNT_EXPONENT[1] as u32
            == INP_LEVEL_PAGE_COUNT_EXPONENT[2] as u32 + INP_REFERENCE_COUNT_EXPONENT
        && INP_LEVEL_PAGE_COUNT_EXPONENT[2] as u32
            == INP_LEVEL_PAGE_COUNT_EXPONENT[3] as u32 + INP_REFERENCE_COUNT_EXPONENT,
    "trie levels must consume uniform key-bit runs"
);

// ============================================================================
// PAGE LAYOUT CONSTANTS
// ============================================================================

/// Nominal page size in bytes (1 MiB).
pub const PAGE_SIZE: usize = 1024 * 1024;

/// Fixed per-page header space reserved out of `PAGE_SIZE`.
pub const PAGE_FIXED_HEADER_SIZE: usize = 64;

/// Maximum serialized record payload stored inline in a leaf. Anything
/// larger spills into an overflow page.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - PAGE_FIXED_HEADER_SIZE;

const _: () = assert!(
    MAX_RECORD_SIZE == PAGE_SIZE - PAGE_FIXED_HEADER_SIZE,
    "MAX_RECORD_SIZE derivation mismatch"
);

/// Sentinel for an absent page key. Never a valid file offset.
pub const NULL_ID: u64 = u64::MAX;

// ============================================================================
// TRANSACTION CACHE BOUNDS
// ============================================================================

/// Capacity of the per-transaction record-page cache.
pub const RECORD_CACHE_CAPACITY: usize = 1000;

/// Time-to-live of record-page cache entries, in seconds.
pub const RECORD_CACHE_TTL_SECS: u64 = 5000;

/// Capacity of the per-transaction path and value caches.
pub const INDEX_CACHE_CAPACITY: usize = 20;

// ============================================================================
// RESOURCE FILE NAMES
// ============================================================================

/// Data file holding the uber head and every appended page block.
pub const DATA_FILE_NAME: &str = "resource.db";

/// Marker file whose presence signals an in-flight commit (and therefore
/// live transaction logs).
pub const COMMIT_MARKER_FILE_NAME: &str = "commit.inflight";

/// Directory holding the per-kind transaction log files.
pub const LOG_DIR_NAME: &str = "log";
