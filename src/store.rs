//! The sharded store.
//!
//! `Storage` hashes each key with [`hash64`] and routes the operation to one
//! of [`BUCKET_COUNT`](crate::constants::BUCKET_COUNT) independent buckets.
//! Monitoring counters are aggregated across buckets on demand.

use crate::bucket::Bucket;
use crate::constants::BUCKET_COUNT;
use crate::hash::hash64;
use crate::stats::Stats;

/// Sharded, in-memory byte-keyed byte-value store.
///
/// Keys and values are arbitrary byte sequences; the empty sequence is valid
/// for both. Written bytes are copied into store-owned buffers, so the
/// caller's slices can be mutated or dropped freely afterwards.
///
/// All methods are safe to call from any number of threads. Operations on
/// the same bucket serialize through its read/write lock; operations on
/// distinct buckets proceed in parallel.
pub struct Storage {
    buckets: Box<[Bucket]>,
}

impl Storage {
    /// Create a fresh empty store with every bucket pre-sized.
    pub fn new() -> Self {
        let buckets: Box<[Bucket]> = (0..BUCKET_COUNT).map(|_| Bucket::new()).collect();
        tracing::debug!(buckets = BUCKET_COUNT, "storage created");
        Self { buckets }
    }

    #[inline]
    fn bucket(&self, hash: u64) -> &Bucket {
        &self.buckets[(hash % BUCKET_COUNT as u64) as usize]
    }

    /// Store `(key, value)`, overwriting any previous value for the key.
    pub fn set(&self, key: &[u8], value: &[u8]) {
        let hash = hash64(key);
        self.bucket(hash).set(key, value, hash);
    }

    /// Append the value stored under `key` to `dst` and return it.
    ///
    /// `dst` comes back unchanged when the key is absent.
    pub fn get(&self, dst: Vec<u8>, key: &[u8]) -> Vec<u8> {
        let (dst, _) = self.has_get(dst, key);
        dst
    }

    /// Like [`get`](Storage::get), but also report whether the key exists.
    pub fn has_get(&self, mut dst: Vec<u8>, key: &[u8]) -> (Vec<u8>, bool) {
        let hash = hash64(key);
        let found = self.bucket(hash).get(&mut dst, key, hash);
        (dst, found)
    }

    /// Whether an entry for `key` exists.
    pub fn has(&self, key: &[u8]) -> bool {
        let hash = hash64(key);
        self.bucket(hash).has(key, hash)
    }

    /// Remove the entry for `key`; a no-op when it is absent.
    pub fn del(&self, key: &[u8]) {
        let hash = hash64(key);
        self.bucket(hash).del(key, hash);
    }

    /// Remove every entry and zero every counter.
    pub fn reset(&self) {
        for bucket in self.buckets.iter() {
            bucket.reset();
        }
        tracing::debug!("storage reset");
    }

    /// Total bytes of live keys and values.
    ///
    /// Sums per-bucket counters with atomic loads and no locking; prefer
    /// [`update_stats`](Storage::update_stats) when several counters are
    /// needed at once.
    pub fn size(&self) -> u64 {
        self.buckets.iter().map(Bucket::bytes_size).sum()
    }

    /// Total collision-path activity across all buckets.
    ///
    /// Zero means no two distinct keys have ever shared a hash within a
    /// bucket since the last reset.
    pub fn collisions(&self) -> u64 {
        self.buckets.iter().map(Bucket::collision_count).sum()
    }

    /// Number of live entries.
    pub fn entries_count(&self) -> u64 {
        self.buckets.iter().map(Bucket::entries_count).sum()
    }

    /// Add this store's counters into `stats`.
    ///
    /// Call [`Stats::reset`] first when re-using the same `Stats` value for
    /// a fresh aggregation.
    pub fn update_stats(&self, stats: &mut Stats) {
        for bucket in self.buckets.iter() {
            bucket.update_stats(stats);
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

// Forced-hash entry points for deterministic collision tests. Routing and
// bucket behavior are identical to the public methods; only the hash is
// caller-chosen.
#[cfg(test)]
impl Storage {
    fn set_with_hash(&self, key: &[u8], value: &[u8], hash: u64) {
        self.bucket(hash).set(key, value, hash);
    }

    fn get_with_hash(&self, mut dst: Vec<u8>, key: &[u8], hash: u64) -> Vec<u8> {
        self.bucket(hash).get(&mut dst, key, hash);
        dst
    }

    fn has_with_hash(&self, key: &[u8], hash: u64) -> bool {
        self.bucket(hash).has(key, hash)
    }

    fn del_with_hash(&self, key: &[u8], hash: u64) {
        self.bucket(hash).del(key, hash);
    }
}
