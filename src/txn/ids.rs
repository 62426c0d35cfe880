//! C1: wait-free TRID and MVCCID allocation (spec.md §4.1).
//!
//! Grounded in `logtb_get_new_tran_id` and `log_Gl.hdr.mvcc_next_id`
//! handling in `examples/original_source/src/transaction/log_tran_table.c`:
//! both counters are plain compare-and-swap loops, no locks involved.

use crate::txn::types::{Mvccid, Trid, FIRST_USER_TRID, MVCCID_FIRST};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Allocates TRIDs and MVCCIDs. Shared by every transaction index; never
/// itself gated by the transaction-table lock (spec.md §5: id allocation is
/// wait-free and outside the lock hierarchy).
#[derive(Debug)]
pub struct IdAllocator {
    next_trid: AtomicI32,
    next_mvccid: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next_trid: AtomicI32::new(FIRST_USER_TRID),
            next_mvccid: AtomicU64::new(MVCCID_FIRST),
        }
    }

    /// Allocates the next TRID, wrapping back to [`FIRST_USER_TRID`] when the
    /// counter would overflow `i32::MAX`. Wrap-around is safe because a TRID
    /// that old has long since left the transaction table; the table assigns
    /// indices, not TRIDs, as the primary key for liveness checks.
    pub fn new_trid(&self) -> Trid {
        loop {
            let cur = self.next_trid.load(Ordering::SeqCst);
            let next = if cur >= i32::MAX { FIRST_USER_TRID } else { cur + 1 };
            if self
                .next_trid
                .compare_exchange_weak(cur, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return cur;
            }
        }
    }

    /// Allocates the next MVCCID. A bare `fetch_add` suffices: unlike TRID,
    /// MVCCID never wraps in the lifetime of a database (spec.md §3).
    pub fn new_mvccid(&self) -> Mvccid {
        self.next_mvccid.fetch_add(1, Ordering::SeqCst)
    }

    /// Allocates two strictly consecutive MVCCIDs in one step, for the
    /// sub-transaction case where a nested operation needs its own
    /// "pre-committed" id adjacent to the parent's (spec.md §4.3,
    /// §9 Open Question 2).
    pub fn new_two_mvccids(&self) -> (Mvccid, Mvccid) {
        let first = self.next_mvccid.fetch_add(2, Ordering::SeqCst);
        (first, first + 1)
    }

    /// Raises the TRID floor past `seen` if it isn't already ahead. Used once
    /// at recovery to make sure a freshly started allocator never reissues a
    /// TRID that appears live in the recovered log (spec.md §9 Open Question
    /// 1, resolved in SPEC_FULL.md: the allocator's floor is advanced rather
    /// than reset, since TRID reuse across a recovery boundary would confuse
    /// any still-open external cursor keyed by TRID).
    pub fn advance_trid_floor(&self, seen: Trid) {
        let target = if seen >= i32::MAX { FIRST_USER_TRID } else { seen + 1 };
        let mut cur = self.next_trid.load(Ordering::SeqCst);
        while cur < target {
            match self
                .next_trid
                .compare_exchange_weak(cur, target, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn current_mvccid(&self) -> Mvccid {
        self.next_mvccid.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn trids_start_at_first_user_trid_and_increment() {
        let alloc = IdAllocator::new();
        assert_eq!(alloc.new_trid(), FIRST_USER_TRID);
        assert_eq!(alloc.new_trid(), FIRST_USER_TRID + 1);
    }

    #[test]
    fn trid_wraps_at_i32_max() {
        let alloc = IdAllocator::new();
        alloc.next_trid.store(i32::MAX, Ordering::SeqCst);
        assert_eq!(alloc.new_trid(), i32::MAX);
        assert_eq!(alloc.new_trid(), FIRST_USER_TRID);
    }

    #[test]
    fn mvccids_are_monotonic_and_never_null() {
        let alloc = IdAllocator::new();
        let a = alloc.new_mvccid();
        let b = alloc.new_mvccid();
        assert!(a > 0);
        assert!(b > a);
    }

    #[test]
    fn two_mvccids_are_consecutive() {
        let alloc = IdAllocator::new();
        let (a, b) = alloc.new_two_mvccids();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn advance_trid_floor_only_moves_forward() {
        let alloc = IdAllocator::new();
        alloc.advance_trid_floor(1000);
        assert_eq!(alloc.new_trid(), 1001);
        alloc.advance_trid_floor(5);
        assert_eq!(alloc.new_trid(), 1002);
    }

    #[test]
    fn concurrent_trid_allocation_never_duplicates() {
        let alloc = Arc::new(IdAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let alloc = Arc::clone(&alloc);
            handles.push(thread::spawn(move || {
                let mut v = Vec::with_capacity(200);
                for _ in 0..200 {
                    v.push(alloc.new_trid());
                }
                v
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
    }
}
