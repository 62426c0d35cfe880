//! C6: unique-index statistics (spec.md §4.6).
//!
//! Two layers, matching the source's `LOG_TRAN_BTID_UNIQUE_STATS` /
//! `log_Gl.unique_stats_table` split:
//!
//! - [`TranUniqueStats`]: a per-TDES chunked list of (BTID, key/oid/null
//!   delta) triples. Deltas accumulate as a transaction inserts/deletes
//!   unique-indexed rows and are thrown away whole on abort.
//! - [`GlobalUniqueStats`]: a `DashMap` keyed by BTID holding the
//!   transaction-visible running totals. On commit, a TDES's deltas are
//!   folded in here; [`GlobalUniqueStats::reflect_to_root`] is the only path
//!   that ever touches the B-tree root page, through [`PageFixer`].

use crate::txn::collab::PageFixer;
use dashmap::DashMap;
use parking_lot::Mutex;

/// B-tree identifier. Opaque to this crate beyond being a stable key.
pub type Btid = u64;

const CHUNK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub keys: i64,
    pub oids: i64,
    pub nulls: i64,
}

impl Counters {
    fn add(&mut self, other: Counters) {
        self.keys += other.keys;
        self.oids += other.oids;
        self.nulls += other.nulls;
    }
}

#[derive(Debug, Clone, Copy)]
struct Delta {
    btid: Btid,
    delta: Counters,
}

/// Per-TDES accumulator. Grows in fixed-size chunks the way the source grows
/// `num_unique_btids` in increments rather than one entry at a time, so a
/// transaction touching many unique indexes doesn't reallocate on every
/// insert.
#[derive(Default)]
pub struct TranUniqueStats {
    chunks: Mutex<Vec<Vec<Delta>>>,
}

impl TranUniqueStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a (keys, oids, nulls) delta into this transaction's running
    /// total for `btid`, merging with any existing entry for the same BTID
    /// rather than appending a duplicate.
    pub fn record_delta(&self, btid: Btid, delta: Counters) {
        let mut chunks = self.chunks.lock();
        for chunk in chunks.iter_mut() {
            for entry in chunk.iter_mut() {
                if entry.btid == btid {
                    entry.delta.add(delta);
                    return;
                }
            }
        }
        match chunks.last_mut() {
            Some(chunk) if chunk.len() < CHUNK_SIZE => chunk.push(Delta { btid, delta }),
            _ => chunks.push(vec![Delta { btid, delta }]),
        }
    }

    /// Current accumulated delta for one BTID, if this transaction touched it.
    pub fn delta_for(&self, btid: Btid) -> Option<Counters> {
        self.chunks
            .lock()
            .iter()
            .flatten()
            .find(|e| e.btid == btid)
            .map(|e| e.delta)
    }

    /// Snapshot of every (btid, delta) pair accumulated so far.
    pub fn snapshot(&self) -> Vec<(Btid, Counters)> {
        self.chunks
            .lock()
            .iter()
            .flatten()
            .map(|e| (e.btid, e.delta))
            .collect()
    }

    /// Drops all accumulated deltas. Called on abort, and after a successful
    /// reflect-into-global on commit.
    pub fn clear(&self) {
        self.chunks.lock().clear();
    }
}

/// The transaction-visible global running totals, independent of any single
/// TDES. Readers see whatever the last committed reflection left behind;
/// spec.md §4.6 does not require per-reader MVCC snapshots of these counts
/// since they are an optimizer statistic, not transactional data.
#[derive(Default)]
pub struct GlobalUniqueStats {
    table: DashMap<Btid, Counters>,
}

impl GlobalUniqueStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, btid: Btid) -> Counters {
        self.table.get(&btid).map(|c| *c).unwrap_or_default()
    }

    /// Folds every delta a committing transaction accumulated into the
    /// global table. Returns the set of BTIDs touched, for the caller to
    /// decide whether/when to reflect to the root page.
    pub fn commit_deltas(&self, stats: &TranUniqueStats) -> Vec<Btid> {
        let snapshot = stats.snapshot();
        let mut touched = Vec::with_capacity(snapshot.len());
        for (btid, delta) in snapshot {
            self.table.entry(btid).or_default().add(delta);
            touched.push(btid);
        }
        stats.clear();
        touched
    }

    /// Writes the current global totals for `btid` into the B-tree root page
    /// through the supplied [`PageFixer`]. This is the only write path into
    /// storage this module has; it never fixes a page itself.
    pub fn reflect_to_root(&self, btid: Btid, pager: &dyn PageFixer) {
        let counters = self.get(btid);
        pager.write_root_counters(btid, (counters.keys, counters.oids, counters.nulls));
    }

    /// Seeds the in-memory table from the authoritative root page, used once
    /// at startup for a BTID the table hasn't seen yet.
    pub fn load_from_root(&self, btid: Btid, pager: &dyn PageFixer) {
        if let Some((keys, oids, nulls)) = pager.read_root_counters(btid) {
            self.table.insert(btid, Counters { keys, oids, nulls });
        }
    }

    /// Returns the entry for `btid`, seeding it from the B-tree root on first
    /// touch if the table hasn't seen it yet (spec.md §4.6 `get_or_load`).
    /// Callers must not hold a page latch when calling this (spec.md §5's
    /// lock order: transaction-table → MVCC-table → per-BTID mutex → page
    /// buffer — the root fix happens strictly after any BTID mutex a caller
    /// might already hold).
    pub fn get_or_load(&self, btid: Btid, pager: &dyn PageFixer) -> Counters {
        if let Some(existing) = self.table.get(&btid) {
            return *existing;
        }
        self.load_from_root(btid, pager);
        self.get(btid)
    }

    /// Installs an absolute triple, overwriting whatever was there. Used
    /// during crash recovery to reinstall a known-good value from the log
    /// rather than accumulating a delta on top of a possibly torn one.
    pub fn apply_absolute(&self, btid: Btid, counters: Counters) {
        self.table.insert(btid, counters);
    }

    /// Removes a BTID's entry entirely, used when its index is dropped.
    pub fn remove(&self, btid: Btid) {
        self.table.remove(&btid);
    }

    /// Writes every tracked BTID's current totals to its B-tree root page.
    /// Interrupts should be disabled by the caller across this call (spec.md
    /// §4.6): a partial reflection split by a crash would desynchronize the
    /// global store from on-disk state for every BTID not yet reached.
    pub fn reflect_all_to_roots(&self, pager: &dyn PageFixer) {
        for entry in self.table.iter() {
            pager.write_root_counters(*entry.key(), (entry.keys, entry.oids, entry.nulls));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::collab::fakes::InMemoryPageFixer;

    #[test]
    fn deltas_for_same_btid_merge_instead_of_duplicating() {
        let stats = TranUniqueStats::new();
        stats.record_delta(1, Counters { keys: 1, oids: 1, nulls: 0 });
        stats.record_delta(1, Counters { keys: 1, oids: 1, nulls: 0 });
        stats.record_delta(2, Counters { keys: 1, oids: 0, nulls: 1 });
        assert_eq!(stats.delta_for(1), Some(Counters { keys: 2, oids: 2, nulls: 0 }));
        assert_eq!(stats.snapshot().len(), 2);
    }

    #[test]
    fn commit_folds_and_clears_per_tran_deltas() {
        let stats = TranUniqueStats::new();
        stats.record_delta(7, Counters { keys: 3, oids: 3, nulls: 0 });
        let global = GlobalUniqueStats::new();
        let touched = global.commit_deltas(&stats);
        assert_eq!(touched, vec![7]);
        assert_eq!(global.get(7), Counters { keys: 3, oids: 3, nulls: 0 });
        assert!(stats.snapshot().is_empty());
    }

    #[test]
    fn abort_discards_deltas_without_touching_global() {
        let stats = TranUniqueStats::new();
        stats.record_delta(9, Counters { keys: 5, oids: 5, nulls: 0 });
        stats.clear();
        let global = GlobalUniqueStats::new();
        assert_eq!(global.commit_deltas(&stats), Vec::<Btid>::new());
        assert_eq!(global.get(9), Counters::default());
    }

    #[test]
    fn reflect_to_root_writes_current_global_totals() {
        let global = GlobalUniqueStats::new();
        let stats = TranUniqueStats::new();
        stats.record_delta(4, Counters { keys: 2, oids: 2, nulls: 1 });
        global.commit_deltas(&stats);
        let pager = InMemoryPageFixer::default();
        global.reflect_to_root(4, &pager);
        assert_eq!(pager.read_root_counters(4), Some((2, 2, 1)));
    }

    #[test]
    fn get_or_load_seeds_from_root_exactly_once() {
        let global = GlobalUniqueStats::new();
        let pager = InMemoryPageFixer::default();
        pager.write_root_counters(11, (9, 9, 0));
        assert_eq!(global.get_or_load(11, &pager), Counters { keys: 9, oids: 9, nulls: 0 });

        // Once cached, a stale root value is not re-read.
        pager.write_root_counters(11, (100, 100, 0));
        assert_eq!(global.get_or_load(11, &pager), Counters { keys: 9, oids: 9, nulls: 0 });
    }

    #[test]
    fn remove_drops_the_entry_entirely() {
        let global = GlobalUniqueStats::new();
        global.apply_absolute(3, Counters { keys: 1, oids: 1, nulls: 0 });
        global.remove(3);
        assert_eq!(global.get(3), Counters::default());
    }

    #[test]
    fn reflect_all_to_roots_writes_every_tracked_btid() {
        let global = GlobalUniqueStats::new();
        global.apply_absolute(1, Counters { keys: 1, oids: 1, nulls: 0 });
        global.apply_absolute(2, Counters { keys: 2, oids: 2, nulls: 1 });
        let pager = InMemoryPageFixer::default();
        global.reflect_all_to_roots(&pager);
        assert_eq!(pager.read_root_counters(1), Some((1, 1, 0)));
        assert_eq!(pager.read_root_counters(2), Some((2, 2, 1)));
    }

    #[test]
    fn chunk_boundary_does_not_lose_entries() {
        let stats = TranUniqueStats::new();
        for btid in 0..(CHUNK_SIZE as u64 * 3) {
            stats.record_delta(btid, Counters { keys: 1, oids: 1, nulls: 0 });
        }
        assert_eq!(stats.snapshot().len(), CHUNK_SIZE * 3);
    }
}
