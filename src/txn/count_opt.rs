//! C7: the count-optimization cache (spec.md §4.7).
//!
//! Many "count the rows" queries can skip a heap scan entirely when the
//! transaction's snapshot can't see any uncommitted writer of the class: the
//! global unique-index counters (C6) are already exact in that case. Each
//! TDES keeps a small map from class OID to {not-loaded, to-load, loaded}.
//! A caller preparing a query marks the classes it cares about `to_load`;
//! the next snapshot build walks the map and loads the (keys, oids, nulls)
//! triple for each from the global store. Invalidating the snapshot (every
//! statement boundary under read-committed, or an explicit rebuild) resets
//! every entry back to `not-loaded` so stale counts are never reused across
//! a snapshot change.

use crate::txn::unique_stats::{Counters, GlobalUniqueStats};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Class identifier. Opaque beyond being a stable key (the catalog itself is
/// out of scope for this crate). Shares its representation with a BTID
/// since both ultimately key the same global unique-index counter store —
/// a class's row count is exactly the key-count of its primary unique index.
pub type ClassOid = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountOptState {
    /// Nothing requested yet for this class this transaction.
    NotLoaded,
    /// A caller asked for this class's count; not loaded yet.
    ToLoad,
    /// Loaded from the global store as of the last `load_pending` call.
    Loaded(Counters),
}

#[derive(Default)]
pub struct CountOptCache {
    entries: RwLock<HashMap<ClassOid, CountOptState>>,
}

impl CountOptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `not-loaded` for any class never mentioned this transaction.
    pub fn state(&self, class: ClassOid) -> CountOptState {
        self.entries.read().get(&class).copied().unwrap_or(CountOptState::NotLoaded)
    }

    /// Marks a class as wanting its counters loaded on the next
    /// `load_pending` call (spec.md §4.7: catalog prefetch / query
    /// preparation).
    pub fn mark_to_load(&self, class: ClassOid) {
        self.entries
            .write()
            .entry(class)
            .and_modify(|s| {
                if !matches!(s, CountOptState::Loaded(_)) {
                    *s = CountOptState::ToLoad;
                }
            })
            .or_insert(CountOptState::ToLoad);
    }

    /// Loads the (keys, oids, nulls) triple for every class marked
    /// `to_load` from the global unique-index store, called once per
    /// snapshot build. Classes already `Loaded` or still `NotLoaded` are
    /// left untouched. A class OID keys the same counter entry as the BTID
    /// of its primary unique index (the catalog, which would resolve one to
    /// the other, is out of scope for this crate).
    pub fn load_pending(&self, global: &GlobalUniqueStats) {
        let mut entries = self.entries.write();
        let to_load: Vec<ClassOid> = entries
            .iter()
            .filter(|(_, s)| matches!(s, CountOptState::ToLoad))
            .map(|(&class, _)| class)
            .collect();
        for class in to_load {
            entries.insert(class, CountOptState::Loaded(global.get(class)));
        }
    }

    /// Thrown away wholesale at transaction end, or whenever the owning
    /// transaction's snapshot is invalidated (spec.md §4.7): the next
    /// snapshot starts every class back at `not-loaded`.
    pub fn invalidate(&self) {
        self.entries.write().clear();
    }

    /// Alias for [`Self::invalidate`], used at commit/abort (`logtb_clear_tdes`).
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::unique_stats::TranUniqueStats;

    #[test]
    fn unseen_class_is_not_loaded() {
        let cache = CountOptCache::new();
        assert_eq!(cache.state(1), CountOptState::NotLoaded);
    }

    #[test]
    fn mark_to_load_then_load_pending_fills_in_counters() {
        let cache = CountOptCache::new();
        let global = GlobalUniqueStats::new();
        let deltas = TranUniqueStats::new();
        deltas.record_delta(1, Counters { keys: 4, oids: 4, nulls: 0 });
        global.commit_deltas(&deltas);

        cache.mark_to_load(1);
        assert_eq!(cache.state(1), CountOptState::ToLoad);
        cache.load_pending(&global);
        assert_eq!(cache.state(1), CountOptState::Loaded(Counters { keys: 4, oids: 4, nulls: 0 }));
    }

    #[test]
    fn load_pending_does_not_disturb_classes_not_marked_to_load() {
        let cache = CountOptCache::new();
        let global = GlobalUniqueStats::new();
        cache.load_pending(&global);
        assert_eq!(cache.state(2), CountOptState::NotLoaded);
    }

    #[test]
    fn marking_an_already_loaded_class_to_load_again_is_a_no_op() {
        let cache = CountOptCache::new();
        let global = GlobalUniqueStats::new();
        global.apply_absolute(5, Counters { keys: 1, oids: 1, nulls: 0 });
        cache.mark_to_load(5);
        cache.load_pending(&global);
        let loaded = cache.state(5);
        cache.mark_to_load(5);
        assert_eq!(cache.state(5), loaded);
    }

    #[test]
    fn invalidate_resets_every_class_to_not_loaded() {
        let cache = CountOptCache::new();
        let global = GlobalUniqueStats::new();
        cache.mark_to_load(1);
        cache.load_pending(&global);
        cache.invalidate();
        assert_eq!(cache.state(1), CountOptState::NotLoaded);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = CountOptCache::new();
        cache.mark_to_load(1);
        cache.clear();
        assert_eq!(cache.state(1), CountOptState::NotLoaded);
    }
}
