//! Aggregate monitoring counters.

/// Aggregated storage counters.
///
/// Filled additively by [`Storage::update_stats`](crate::Storage::update_stats):
/// each bucket's counters are summed into the fields below. Call
/// [`reset`](Stats::reset) before re-using the same value for a fresh
/// aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of get calls, including `has` and `has_get`.
    pub get_calls: u64,
    /// Number of set calls.
    pub set_calls: u64,
    /// Number of lookups that did not find their key.
    pub misses: u64,
    /// Hash-collision events plus collision-path traversals.
    ///
    /// Zero means no two distinct keys have ever shared a hash within a
    /// bucket; the absolute magnitude beyond that is diagnostic.
    pub collisions: u64,
    /// Current number of live entries.
    pub entries_count: u64,
    /// Current bytes of live keys and values.
    pub bytes_size: u64,
}

impl Stats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter so the value can be re-used for the next
    /// aggregation.
    pub fn reset(&mut self) {
        *self = Stats::default();
    }
}
