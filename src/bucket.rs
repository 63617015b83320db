//! A single shard of the store.
//!
//! Each bucket owns a slab of reusable key/value buffer pairs and two
//! indices over it:
//!
//! - `primary` maps a key hash to the slot of the only key seen with that
//!   hash;
//! - `colliding` maps a hash shared by two or more distinct keys to the
//!   unordered list of their slots.
//!
//! A hash lives in exactly one of the two maps. Lookups consult `colliding`
//! only while the bucket's collision counter is nonzero; the counter is a
//! one-way latch that stays zero until the first time two distinct keys
//! share a hash, so the common case pays a single map lookup. Slots vacated
//! by deletes keep their buffer capacity and are recycled through the free
//! list before the slab grows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::constants::{FREE_SLOTS, SLAB_SLOTS, SLOT_BYTES};
use crate::stats::Stats;

/// One key/value buffer pair in the slab.
///
/// A freed slot has both lengths at zero but keeps its capacity.
#[derive(Debug, Default)]
struct Slot {
    key: Vec<u8>,
    value: Vec<u8>,
}

impl Slot {
    fn with_capacity(bytes: usize) -> Self {
        Self {
            key: Vec::with_capacity(bytes),
            value: Vec::with_capacity(bytes),
        }
    }
}

/// Copy `bytes` into `buf`, reusing the existing allocation when it is large
/// enough and replacing it with an exact-size one otherwise.
fn fill(buf: &mut Vec<u8>, bytes: &[u8]) {
    if buf.capacity() >= bytes.len() {
        buf.clear();
        buf.extend_from_slice(bytes);
    } else {
        *buf = bytes.to_vec();
    }
}

/// Structural state of a bucket, guarded by the bucket's lock.
#[derive(Debug)]
struct Index {
    /// Hash to slot for hashes with a single key.
    primary: HashMap<u64, usize>,
    /// Hash to all slots of the distinct keys sharing it. Never holds an
    /// empty list.
    colliding: HashMap<u64, Vec<usize>>,
    /// Slab of reusable key/value buffers shared by both maps.
    slots: Vec<Slot>,
    /// Slots vacated by deletes, available with their capacity intact.
    free: Vec<usize>,
    /// Next never-used slab position.
    cursor: usize,
}

impl Index {
    fn pristine() -> Self {
        let mut slots = Vec::with_capacity(SLAB_SLOTS);
        slots.resize_with(SLAB_SLOTS, || Slot::with_capacity(SLOT_BYTES));
        Self {
            primary: HashMap::with_capacity(SLAB_SLOTS),
            // Collisions are rare; not worth pre-sizing.
            colliding: HashMap::new(),
            slots,
            free: Vec::with_capacity(FREE_SLOTS),
            cursor: 0,
        }
    }

    /// Number of live entries across both indices.
    fn entries(&self) -> u64 {
        let colliding: usize = self.colliding.values().map(Vec::len).sum();
        (self.primary.len() + colliding) as u64
    }

    /// Write the pair into the slot at `cursor`, growing the slab by one
    /// fresh slot once every pre-allocated one has been used.
    fn append(&mut self, key: &[u8], value: &[u8]) {
        if self.cursor < self.slots.len() {
            let slot = &mut self.slots[self.cursor];
            fill(&mut slot.key, key);
            fill(&mut slot.value, value);
        } else {
            self.slots.push(Slot {
                key: key.to_vec(),
                value: value.to_vec(),
            });
        }
        self.cursor += 1;
    }
}

/// A single shard holding every entry whose hash routes to it.
///
/// Counters are updated with relaxed atomic adds independently of the
/// structural lock: the read path bumps `get_calls`, `misses` and
/// `collisions` while holding only the shared lock.
pub(crate) struct Bucket {
    index: RwLock<Index>,

    /// Bytes of live keys plus values.
    size: AtomicU64,

    get_calls: AtomicU64,
    set_calls: AtomicU64,
    misses: AtomicU64,
    collisions: AtomicU64,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        Self {
            index: RwLock::new(Index::pristine()),
            size: AtomicU64::new(0),
            get_calls: AtomicU64::new(0),
            set_calls: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            collisions: AtomicU64::new(0),
        }
    }

    /// Insert or update `(key, value)`.
    pub(crate) fn set(&self, key: &[u8], value: &[u8], hash: u64) {
        self.set_calls.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.index.write();
        let index = &mut *guard;

        // Checking the latch instead of probing `colliding` keeps the
        // collision-free path to a single primary lookup.
        if self.collisions.load(Ordering::Relaxed) != 0 {
            if let Some(slot_list) = index.colliding.get_mut(&hash) {
                self.collisions.fetch_add(1, Ordering::Relaxed);
                for &slot_idx in slot_list.iter() {
                    if index.slots[slot_idx].key == key {
                        self.replace_value(&mut index.slots[slot_idx], value);
                        return;
                    }
                }
                // Yet another distinct key under an already colliding hash.
                let cursor = index.cursor;
                slot_list.push(cursor);
                index.append(key, value);
                self.size
                    .fetch_add((key.len() + value.len()) as u64, Ordering::Relaxed);
                return;
            }
        }

        if let Some(&slot_idx) = index.primary.get(&hash) {
            if index.slots[slot_idx].key == key {
                self.replace_value(&mut index.slots[slot_idx], value);
            } else {
                // A second distinct key shares this hash for the first time:
                // migrate the hash from the primary to the collision index.
                self.collisions.fetch_add(1, Ordering::Relaxed);
                let cursor = index.cursor;
                index.colliding.insert(hash, vec![slot_idx, cursor]);
                index.primary.remove(&hash);
                index.append(key, value);
                self.size
                    .fetch_add((key.len() + value.len()) as u64, Ordering::Relaxed);
            }
            return;
        }

        if let Some(slot_idx) = index.free.pop() {
            // Recycle a vacated slot instead of advancing the cursor.
            let slot = &mut index.slots[slot_idx];
            fill(&mut slot.key, key);
            fill(&mut slot.value, value);
            index.primary.insert(hash, slot_idx);
            self.size
                .fetch_add((key.len() + value.len()) as u64, Ordering::Relaxed);
            return;
        }

        index.primary.insert(hash, index.cursor);
        index.append(key, value);
        self.size
            .fetch_add((key.len() + value.len()) as u64, Ordering::Relaxed);
    }

    /// Same-key overwrite: adjust the byte-size delta and rewrite the value
    /// buffer, reusing its allocation when the capacity suffices.
    fn replace_value(&self, slot: &mut Slot, value: &[u8]) {
        if slot.value == value {
            return;
        }
        // The delta may be negative; wrapping adds keep the sum exact.
        self.size.fetch_add(
            (value.len() as u64).wrapping_sub(slot.value.len() as u64),
            Ordering::Relaxed,
        );
        fill(&mut slot.value, value);
    }

    /// Append the value stored under `key` to `dst`; report whether the key
    /// exists.
    pub(crate) fn get(&self, dst: &mut Vec<u8>, key: &[u8], hash: u64) -> bool {
        self.lookup(Some(dst), key, hash)
    }

    /// Like [`get`](Bucket::get) without copying bytes out.
    pub(crate) fn has(&self, key: &[u8], hash: u64) -> bool {
        self.lookup(None, key, hash)
    }

    fn lookup(&self, dst: Option<&mut Vec<u8>>, key: &[u8], hash: u64) -> bool {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        let index = self.index.read();

        if self.collisions.load(Ordering::Relaxed) != 0 {
            if let Some(slot_list) = index.colliding.get(&hash) {
                self.collisions.fetch_add(1, Ordering::Relaxed);
                for &slot_idx in slot_list {
                    let slot = &index.slots[slot_idx];
                    if slot.key == key {
                        if let Some(dst) = dst {
                            dst.extend_from_slice(&slot.value);
                        }
                        return true;
                    }
                }
                // The hash collides but none of its keys match.
                self.misses.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        if let Some(&slot_idx) = index.primary.get(&hash) {
            let slot = &index.slots[slot_idx];
            if slot.key == key {
                if let Some(dst) = dst {
                    dst.extend_from_slice(&slot.value);
                }
                return true;
            }
            // Hash matched, key bytes did not.
            self.collisions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Remove the entry for `key`; a no-op when it is absent.
    pub(crate) fn del(&self, key: &[u8], hash: u64) {
        let mut guard = self.index.write();
        let index = &mut *guard;

        if self.collisions.load(Ordering::Relaxed) != 0 {
            if let Some(slot_list) = index.colliding.get_mut(&hash) {
                self.collisions.fetch_add(1, Ordering::Relaxed);
                let matched = slot_list
                    .iter()
                    .position(|&slot_idx| index.slots[slot_idx].key == key);
                let Some(pos) = matched else {
                    // The hash collides but none of its keys match.
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return;
                };

                let slot_idx = slot_list[pos];
                let slot = &mut index.slots[slot_idx];
                self.size.fetch_sub(
                    (slot.key.len() + slot.value.len()) as u64,
                    Ordering::Relaxed,
                );
                slot.key.clear();
                slot.value.clear();
                index.free.push(slot_idx);
                // List order carries no meaning, so swap-remove is fine.
                slot_list.swap_remove(pos);

                match slot_list.len() {
                    n if n >= 2 => {}
                    1 => {
                        // One key left under this hash: move it back to the
                        // primary index. The collision latch stays set.
                        let survivor = slot_list[0];
                        index.primary.insert(hash, survivor);
                        index.colliding.remove(&hash);
                    }
                    _ => panic!("BUG: colliding slot list emptied by a single removal"),
                }
                return;
            }
        }

        let Some(&slot_idx) = index.primary.get(&hash) else {
            return;
        };
        if index.slots[slot_idx].key != key {
            // Hash matched, key bytes did not.
            self.collisions.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let slot = &mut index.slots[slot_idx];
        self.size.fetch_sub(
            (slot.key.len() + slot.value.len()) as u64,
            Ordering::Relaxed,
        );
        slot.key.clear();
        slot.value.clear();
        index.free.push(slot_idx);
        index.primary.remove(&hash);
    }

    /// Drop every entry and zero every counter, restoring the pristine
    /// pre-sized state.
    pub(crate) fn reset(&self) {
        let mut index = self.index.write();
        *index = Index::pristine();
        self.size.store(0, Ordering::Relaxed);
        self.get_calls.store(0, Ordering::Relaxed);
        self.set_calls.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.collisions.store(0, Ordering::Relaxed);
    }

    /// Add this bucket's counters into `stats`.
    pub(crate) fn update_stats(&self, stats: &mut Stats) {
        stats.get_calls += self.get_calls.load(Ordering::Relaxed);
        stats.set_calls += self.set_calls.load(Ordering::Relaxed);
        stats.misses += self.misses.load(Ordering::Relaxed);
        stats.collisions += self.collisions.load(Ordering::Relaxed);
        stats.bytes_size += self.size.load(Ordering::Relaxed);

        let index = self.index.read();
        stats.entries_count += index.entries();
    }

    /// Bytes of live keys and values (lock-free).
    pub(crate) fn bytes_size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Collision counter value (lock-free).
    pub(crate) fn collision_count(&self) -> u64 {
        self.collisions.load(Ordering::Relaxed)
    }

    /// Number of live entries.
    pub(crate) fn entries_count(&self) -> u64 {
        self.index.read().entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: u64 = 0xdead_beef;
    const HASH_B: u64 = 0xcafe_f00d;

    fn get(bucket: &Bucket, key: &[u8], hash: u64) -> Option<Vec<u8>> {
        let mut dst = Vec::new();
        bucket.get(&mut dst, key, hash).then_some(dst)
    }

    #[test]
    fn set_get_del_roundtrip() {
        let bucket = Bucket::new();

        bucket.set(b"key", b"value", HASH_A);
        assert_eq!(get(&bucket, b"key", HASH_A).as_deref(), Some(&b"value"[..]));
        assert!(bucket.has(b"key", HASH_A));
        assert_eq!(bucket.entries_count(), 1);
        assert_eq!(bucket.bytes_size(), 8);

        bucket.del(b"key", HASH_A);
        assert_eq!(get(&bucket, b"key", HASH_A), None);
        assert!(!bucket.has(b"key", HASH_A));
        assert_eq!(bucket.entries_count(), 0);
        assert_eq!(bucket.bytes_size(), 0);
    }

    #[test]
    fn same_value_set_is_a_noop() {
        let bucket = Bucket::new();

        bucket.set(b"key", b"value", HASH_A);
        bucket.set(b"key", b"value", HASH_A);
        assert_eq!(bucket.entries_count(), 1);
        assert_eq!(bucket.bytes_size(), 8);
    }

    #[test]
    fn value_overwrite_reuses_buffer_capacity() {
        let bucket = Bucket::new();

        bucket.set(b"key", b"0123456789abcdef", HASH_A);
        let grown = bucket.index.read().slots[0].value.capacity();
        assert!(grown >= 16);

        // A shorter value must shrink the length, not the allocation.
        bucket.set(b"key", b"xy", HASH_A);
        {
            let index = bucket.index.read();
            assert_eq!(index.slots[0].value.len(), 2);
            assert_eq!(index.slots[0].value.capacity(), grown);
        }
        assert_eq!(bucket.bytes_size(), 5);
        assert_eq!(get(&bucket, b"key", HASH_A).as_deref(), Some(&b"xy"[..]));
    }

    #[test]
    fn deleted_slot_is_recycled_before_the_cursor_moves() {
        let bucket = Bucket::new();

        bucket.set(b"first", b"value", HASH_A);
        bucket.del(b"first", HASH_A);
        bucket.set(b"second", b"value", HASH_B);

        let index = bucket.index.read();
        assert_eq!(index.cursor, 1);
        assert!(index.free.is_empty());
        assert_eq!(index.slots[0].key, b"second"[..]);
    }

    #[test]
    fn slab_grows_past_the_preallocated_slots() {
        let bucket = Bucket::new();

        for i in 0..(SLAB_SLOTS + 4) {
            let key = format!("key {i}");
            let value = format!("value {i}");
            bucket.set(key.as_bytes(), value.as_bytes(), i as u64);
        }
        assert_eq!(bucket.entries_count(), (SLAB_SLOTS + 4) as u64);
        for i in 0..(SLAB_SLOTS + 4) {
            let key = format!("key {i}");
            let expected = format!("value {i}");
            assert_eq!(
                get(&bucket, key.as_bytes(), i as u64).as_deref(),
                Some(expected.as_bytes())
            );
        }
    }

    #[test]
    fn collision_latch_stays_set_after_the_collision_is_gone() {
        let bucket = Bucket::new();

        bucket.set(b"aaa", b"bbb", HASH_A);
        assert_eq!(bucket.collision_count(), 0);

        bucket.set(b"ccc", b"ddd", HASH_A);
        assert!(bucket.collision_count() > 0);
        assert_eq!(bucket.entries_count(), 2);

        // Shrinking back to one key keeps the latch set.
        bucket.del(b"ccc", HASH_A);
        assert!(bucket.collision_count() > 0);
        assert_eq!(bucket.entries_count(), 1);
        assert_eq!(get(&bucket, b"aaa", HASH_A).as_deref(), Some(&b"bbb"[..]));

        let index = bucket.index.read();
        assert!(index.colliding.is_empty());
        assert!(index.primary.contains_key(&HASH_A));
    }

    #[test]
    fn a_hash_is_never_in_both_indices() {
        let bucket = Bucket::new();

        bucket.set(b"one", b"1", HASH_A);
        bucket.set(b"two", b"2", HASH_A);
        bucket.set(b"three", b"3", HASH_A);
        {
            let index = bucket.index.read();
            assert!(!index.primary.contains_key(&HASH_A));
            assert_eq!(index.colliding[&HASH_A].len(), 3);
        }

        bucket.del(b"one", HASH_A);
        bucket.del(b"two", HASH_A);
        let index = bucket.index.read();
        assert!(index.primary.contains_key(&HASH_A));
        assert!(!index.colliding.contains_key(&HASH_A));
    }

    #[test]
    fn reset_restores_the_pristine_state() {
        let bucket = Bucket::new();

        for i in 0..40u64 {
            bucket.set(format!("key {i}").as_bytes(), b"value", i);
        }
        bucket.del(b"missing", HASH_A);
        bucket.reset();

        assert_eq!(bucket.entries_count(), 0);
        assert_eq!(bucket.bytes_size(), 0);
        assert_eq!(bucket.collision_count(), 0);

        let mut stats = Stats::new();
        bucket.update_stats(&mut stats);
        assert_eq!(stats, Stats::default());

        let index = bucket.index.read();
        assert_eq!(index.slots.len(), SLAB_SLOTS);
        assert_eq!(index.cursor, 0);
        assert!(index.free.is_empty());
    }

    #[test]
    fn update_stats_accumulates() {
        let bucket = Bucket::new();

        bucket.set(b"key", b"value", HASH_A);
        let mut dst = Vec::new();
        bucket.get(&mut dst, b"key", HASH_A);
        bucket.get(&mut dst, b"missing", HASH_B);

        let mut stats = Stats::new();
        bucket.update_stats(&mut stats);
        assert_eq!(stats.set_calls, 1);
        assert_eq!(stats.get_calls, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries_count, 1);
        assert_eq!(stats.bytes_size, 8);

        // `update_stats` adds; a second pass without reset doubles.
        bucket.update_stats(&mut stats);
        assert_eq!(stats.get_calls, 4);
        stats.reset();
        bucket.update_stats(&mut stats);
        assert_eq!(stats.get_calls, 2);
    }

    #[test]
    fn empty_keys_and_values_are_stored() {
        let bucket = Bucket::new();

        bucket.set(b"", b"", HASH_A);
        assert!(bucket.has(b"", HASH_A));
        assert_eq!(bucket.entries_count(), 1);
        assert_eq!(bucket.bytes_size(), 0);

        bucket.set(b"", b"payload", HASH_A);
        assert_eq!(get(&bucket, b"", HASH_A).as_deref(), Some(&b"payload"[..]));
        assert_eq!(bucket.bytes_size(), 7);

        bucket.del(b"", HASH_A);
        assert!(!bucket.has(b"", HASH_A));
        assert_eq!(bucket.bytes_size(), 0);
    }
}
