//! bytestash - a sharded, in-memory byte-keyed byte-value store
//!
//! The store maps arbitrary byte sequences (including empty ones) to
//! arbitrary byte sequences. Keys are routed by a 64-bit hash to one of 512
//! independent buckets, each with its own read/write lock, a slab of
//! reusable key/value buffers and a set of monitoring counters, so
//! operations on different buckets never contend and repeated overwrites of
//! a key do not churn the heap.
//!
//! There is no capacity ceiling and no eviction: entries stay until they are
//! deleted or the store is reset.
//!
//! # Quick Start
//!
//! ```rust
//! use bytestash::Storage;
//!
//! let store = Storage::new();
//! store.set(b"key", b"value");
//!
//! // `get` appends the value to the buffer it is given.
//! let value = store.get(Vec::new(), b"key");
//! assert_eq!(value, b"value");
//!
//! store.del(b"key");
//! assert!(!store.has(b"key"));
//! ```

#![warn(missing_docs)]

mod bucket;
pub mod hash;
pub mod stats;
pub mod store;

// Re-exports for convenience
pub use hash::hash64;
pub use stats::Stats;
pub use store::Storage;

/// Tuning constants used throughout the store.
pub mod constants {
    /// Number of buckets the key space is sharded into.
    pub const BUCKET_COUNT: usize = 512;

    /// Number of slots pre-allocated in each bucket's slab.
    pub const SLAB_SLOTS: usize = 16;

    /// Initial byte capacity of each slot's key and value buffers.
    pub const SLOT_BYTES: usize = 8;

    /// Initial capacity of each bucket's free-slot list.
    pub const FREE_SLOTS: usize = 2;
}
