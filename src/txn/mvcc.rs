//! C3: the MVCC table, snapshot construction, and visibility (spec.md §4.3).
//!
//! Grounded in `logtb_get_mvcc_snapshot` / `mvcc_table` bit-area handling in
//! `examples/original_source/src/transaction/log_tran_table.c`: a snapshot
//! is a cheap (lowest-active, highest-completed, active-id-list) triple, not
//! a copy of every row version, and a bit area tracks which recently
//! allocated MVCCIDs have completed so the active-id list can skip anything
//! already known done without a linear scan of the whole table.

use crate::txn::ids::IdAllocator;
use crate::txn::table::TranTable;
use crate::txn::tdes::Tdes;
use crate::txn::types::{Mvccid, MVCCID_NULL};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-TDES MVCC state: the transaction's own MVCCID (assigned lazily, on
/// its first row write), any sub-transaction MVCCIDs opened under it, and
/// the last snapshot it built.
#[derive(Debug, Clone, Default)]
pub struct MvccInfo {
    pub id: Mvccid,
    pub sub_ids: Vec<Mvccid>,
    pub snapshot: Option<Snapshot>,
}

impl MvccInfo {
    /// `is_current_mvccid` (spec.md §6: provided to collaborators so a
    /// reader can tell "this is my own id" apart from "this id is merely
    /// visible to me"). True for the transaction's own id and any of its
    /// still-open sub-transaction ids (spec.md §8 Scenario F: a
    /// transaction's own reads see its own sub-transaction's writes as
    /// current even before either completes).
    pub fn is_current_mvccid(&self, mvccid: Mvccid) -> bool {
        (self.id != MVCCID_NULL && self.id == mvccid) || self.sub_ids.contains(&mvccid)
    }
}

/// An immutable view of which MVCCIDs were complete at one instant.
/// `lowest_active` and `highest_completed` bound the range that needs a
/// membership check at all: anything below `lowest_active` is visible,
/// anything at or above `highest_completed` did not exist yet and is not.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub lowest_active: Mvccid,
    pub highest_completed: Mvccid,
    pub active_ids: Vec<Mvccid>,
}

impl Snapshot {
    /// Whether a row version stamped with `committer` is visible under this
    /// snapshot. A row with no committer yet (`MVCCID_NULL`) was never
    /// committed and is never visible through a snapshot.
    pub fn is_visible(&self, committer: Mvccid) -> bool {
        if committer == MVCCID_NULL {
            return false;
        }
        if committer < self.lowest_active {
            return true;
        }
        if committer >= self.highest_completed {
            return false;
        }
        !self.active_ids.contains(&committer)
    }
}

/// Tracks in-flight MVCCIDs via a bit area anchored at `bit_area_base`: bit
/// `i` records whether `bit_area_base + i` has completed. The base advances
/// and the front of the area is trimmed whenever a contiguous completed
/// prefix accumulates, so the area's size tracks concurrency, not history.
pub struct MvccTable {
    ids: Arc<IdAllocator>,
    bit_area_base: AtomicU64,
    bits: Mutex<VecDeque<bool>>,
}

impl MvccTable {
    pub fn new(ids: Arc<IdAllocator>) -> Self {
        let base = ids.current_mvccid();
        Self {
            ids,
            bit_area_base: AtomicU64::new(base),
            bits: Mutex::new(VecDeque::new()),
        }
    }

    /// Allocates a fresh MVCCID and starts tracking it as active.
    pub fn assign_mvccid(&self) -> Mvccid {
        let id = self.ids.new_mvccid();
        self.track(id);
        id
    }

    /// Allocates two consecutive MVCCIDs (spec.md §4.3: sub-transaction
    /// pre-commit), tracking both.
    pub fn assign_two_mvccids(&self) -> (Mvccid, Mvccid) {
        let (a, b) = self.ids.new_two_mvccids();
        self.track(a);
        self.track(b);
        (a, b)
    }

    fn track(&self, id: Mvccid) {
        let mut bits = self.bits.lock();
        let base = self.bit_area_base.load(Ordering::SeqCst);
        let needed = (id - base + 1) as usize;
        while (bits.len() as u64) < needed as u64 {
            bits.push_back(false);
        }
    }

    /// Marks `id` as completed (committed or aborted) and trims any
    /// now-all-complete prefix of the bit area.
    pub fn complete(&self, id: Mvccid) {
        let mut bits = self.bits.lock();
        let base = self.bit_area_base.load(Ordering::SeqCst);
        if id >= base {
            let idx = (id - base) as usize;
            if idx < bits.len() {
                bits[idx] = true;
            }
        }
        while matches!(bits.front(), Some(true)) {
            bits.pop_front();
            self.bit_area_base.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Whether `id` is known complete. Anything below the tracked area's
    /// base has necessarily completed (it was trimmed off the front), and
    /// anything above the allocator's current position was never assigned
    /// and counts as not-yet-complete.
    pub fn is_completed(&self, id: Mvccid) -> bool {
        let base = self.bit_area_base.load(Ordering::SeqCst);
        if id < base {
            return true;
        }
        let bits = self.bits.lock();
        let idx = (id - base) as usize;
        bits.get(idx).copied().unwrap_or(false)
    }

    /// Builds a snapshot excluding `self_id` (a transaction always sees its
    /// own writes through row-level logic external to this crate, not
    /// through its own snapshot's active-id list).
    pub fn build_snapshot(&self, table: &TranTable, self_id: Mvccid) -> Snapshot {
        let highest_completed = self.ids.current_mvccid();
        let mut active_ids = Vec::new();
        table.map_active(|tdes: &Tdes| {
            let info = tdes.mvcc.read();
            if info.id != MVCCID_NULL && info.id != self_id && !self.is_completed(info.id) {
                active_ids.push(info.id);
            }
            for &sub in &info.sub_ids {
                if sub != self_id && !self.is_completed(sub) {
                    active_ids.push(sub);
                }
            }
        });
        let lowest_active = active_ids.iter().copied().min().unwrap_or(highest_completed);
        Snapshot { lowest_active, highest_completed, active_ids }
    }
}

/// Completes a transaction's own MVCCID on commit or abort (spec.md §4.3).
pub fn complete_mvcc(mvcc_table: &MvccTable, tdes: &Tdes) {
    let id = tdes.mvcc.read().id;
    if id != MVCCID_NULL {
        mvcc_table.complete(id);
    }
}

/// Completes one sub-transaction MVCCID without touching the parent
/// transaction's own id (spec.md §9 Open Question 2, resolved in
/// SPEC_FULL.md: a sub-transaction's id becomes visible to other
/// transactions' snapshots as soon as its own sysop commits, even though
/// the parent transaction is still active).
pub fn complete_sub_mvcc(mvcc_table: &MvccTable, tdes: &Tdes, sub_id: Mvccid) {
    mvcc_table.complete(sub_id);
    tdes.mvcc.write().sub_ids.retain(|&x| x != sub_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TxnConfig;
    use crate::txn::types::{ClientIdentity, TransactionKind};

    #[test]
    fn snapshot_hides_concurrently_active_writers() {
        let snap = Snapshot {
            lowest_active: 5,
            highest_completed: 10,
            active_ids: vec![7],
        };
        assert!(snap.is_visible(3));
        assert!(snap.is_visible(5));
        assert!(!snap.is_visible(7));
        assert!(snap.is_visible(8));
        assert!(!snap.is_visible(10));
        assert!(!snap.is_visible(MVCCID_NULL));
    }

    #[test]
    fn bit_area_trims_completed_prefix() {
        let ids = Arc::new(IdAllocator::new());
        let mvcc = MvccTable::new(ids);
        let a = mvcc.assign_mvccid();
        let b = mvcc.assign_mvccid();
        let c = mvcc.assign_mvccid();
        mvcc.complete(a);
        mvcc.complete(b);
        assert!(mvcc.is_completed(a));
        assert!(mvcc.is_completed(b));
        assert!(!mvcc.is_completed(c));
        mvcc.complete(c);
        assert!(mvcc.is_completed(c));
    }

    #[test]
    fn build_snapshot_excludes_self_and_completed() {
        let ids = Arc::new(IdAllocator::new());
        let mvcc = MvccTable::new(Arc::clone(&ids));
        let table = TranTable::new(Arc::clone(&ids), TxnConfig::for_testing());

        let idx1 = table
            .assign_index(None, TransactionKind::Worker, ClientIdentity::default())
            .unwrap();
        let idx2 = table
            .assign_index(None, TransactionKind::Worker, ClientIdentity::default())
            .unwrap();
        let tdes1 = table.get(idx1).unwrap();
        let tdes2 = table.get(idx2).unwrap();

        let self_id = mvcc.assign_mvccid();
        tdes1.mvcc.write().id = self_id;

        let other_id = mvcc.assign_mvccid();
        tdes2.mvcc.write().id = other_id;

        let snapshot = mvcc.build_snapshot(&table, self_id);
        assert!(snapshot.active_ids.contains(&other_id));
        assert!(!snapshot.active_ids.contains(&self_id));
    }
}
