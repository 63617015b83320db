//! Stable 64-bit hashing for key bytes.
//!
//! Bucket routing and both per-bucket indices key on this hash, so it must
//! be deterministic across runs and processes. `DefaultHasher` is therefore
//! not an option.

#[cfg(not(any(feature = "hash-xxh3", feature = "hash-xxh64")))]
compile_error!("Enable a hash feature: `hash-xxh3` (default) or `hash-xxh64`.");

/// Hash key bytes into a 64-bit value (deterministic).
#[inline]
pub fn hash64(bytes: &[u8]) -> u64 {
    #[cfg(feature = "hash-xxh3")]
    {
        xxhash_rust::xxh3::xxh3_64(bytes)
    }

    #[cfg(all(not(feature = "hash-xxh3"), feature = "hash-xxh64"))]
    {
        xxhash_rust::xxh64::xxh64(bytes, 0)
    }
}
