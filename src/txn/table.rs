//! C2: the transaction table (spec.md §4.2).
//!
//! A growable pool of transaction-table slots indexed by [`TranIndex`].
//! Structural changes (assign, release, expand) take the table's write
//! lock; everything else — lookups, the per-TDES work every worker thread
//! does constantly — takes only the read lock and then operates on the
//! `Arc<Tdes>` it finds, matching spec.md §5's rule that per-slot work must
//! never block on other slots.
//!
//! Grounded in `logtb_assign_tran_index` / `logtb_free_tran_index` /
//! `logtb_expand_trantable` in
//! `examples/original_source/src/transaction/log_tran_table.c`.

use crate::error::{Result, TxnError};
use crate::txn::ids::IdAllocator;
use crate::txn::tdes::Tdes;
use crate::txn::types::{
    ClientIdentity, TranIndex, TransactionKind, Trid, LOG_SYSTEM_TRANID, LOG_SYSTEM_TRAN_INDEX, NULL_TRANID,
};
use crate::TxnConfig;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

pub struct TranTable {
    slots: RwLock<Vec<Option<Arc<Tdes>>>>,
    hint_free_index: AtomicI32,
    num_assigned: AtomicI32,
    recovery_complete: AtomicBool,
    /// Process-wide count of currently-set, not-yet-observed interrupt flags
    /// (spec.md §4.8): incremented when a flag is set, decremented when a
    /// worker's check point observes and clears its own flag. The page
    /// buffer polls this instead of scanning every TDES.
    num_interrupts: AtomicI32,
    config: TxnConfig,
    ids: Arc<IdAllocator>,
}

impl TranTable {
    /// Builds a table with `config.initial_table_size()` slots, slot 0
    /// permanently reserved for the engine's own bookkeeping transaction
    /// (spec.md §3: `LOG_SYSTEM_TRAN_INDEX`).
    pub fn new(ids: Arc<IdAllocator>, config: TxnConfig) -> Self {
        let size = config.initial_table_size().max(1) as usize;
        let mut slots = Vec::with_capacity(size);
        let system_tdes = Tdes::new(LOG_SYSTEM_TRAN_INDEX, TransactionKind::SystemMain, ClientIdentity::system());
        system_tdes.set_trid(LOG_SYSTEM_TRANID);
        slots.push(Some(Arc::new(system_tdes)));
        for _ in 1..size {
            slots.push(None);
        }
        Self {
            slots: RwLock::new(slots),
            hint_free_index: AtomicI32::new(1),
            num_assigned: AtomicI32::new(1),
            recovery_complete: AtomicBool::new(true),
            num_interrupts: AtomicI32::new(0),
            config,
            ids,
        }
    }

    /// Current value of the process-wide interrupt counter (spec.md §4.8).
    pub fn num_interrupts(&self) -> i32 {
        self.num_interrupts.load(Ordering::SeqCst)
    }

    /// Sets `tdes`'s interrupt flag, incrementing the process-wide counter
    /// exactly once (a flag already set is a no-op, matching the source's
    /// idempotent `logtb_set_tran_index_interrupt`).
    pub fn set_interrupt(&self, tdes: &Tdes) {
        if !tdes.is_interrupted() {
            tdes.set_interrupted(true);
            self.num_interrupts.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// One-shot check: if `tdes`'s interrupt flag is set, clears it and
    /// decrements the process-wide counter, returning `true`. Otherwise
    /// returns `false` without touching the counter (spec.md §4.8: the flag
    /// is consumed exactly once per observation).
    pub fn consume_interrupt(&self, tdes: &Tdes) -> bool {
        if tdes.is_interrupted() {
            tdes.set_interrupted(false);
            self.num_interrupts.fetch_sub(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn mark_recovery_in_progress(&self) {
        self.recovery_complete.store(false, Ordering::SeqCst);
    }

    pub fn mark_recovery_complete(&self) {
        self.recovery_complete.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn num_assigned(&self) -> i32 {
        self.num_assigned.load(Ordering::SeqCst)
    }

    pub fn get(&self, index: TranIndex) -> Option<Arc<Tdes>> {
        let slots = self.slots.read();
        slots.get(index as usize).and_then(|s| s.clone())
    }

    /// Finds the transaction index owning `trid`, scanning occupied slots.
    /// O(n) in the table size, same as the source's linear scan — lookups
    /// by TRID are rare compared to lookups by index.
    pub fn find_by_trid(&self, trid: Trid) -> Option<TranIndex> {
        let slots = self.slots.read();
        slots
            .iter()
            .enumerate()
            .find_map(|(i, slot)| match slot {
                Some(tdes) if tdes.trid() == trid => Some(i as TranIndex),
                _ => None,
            })
    }

    /// Invokes `f` on every occupied slot's TDES under the table's read
    /// lock. `f` must not call back into any method that takes the write
    /// lock (assign/release/expand) or it will deadlock.
    pub fn map_active<F: FnMut(&Tdes)>(&self, mut f: F) {
        let slots = self.slots.read();
        for slot in slots.iter().flatten() {
            f(slot);
        }
    }

    /// Claims a free slot for a new transaction, expanding the table first
    /// if none is free and expansion is still allowed. `requested_trid`
    /// lets recovery re-assign a TRID that already appears in the log
    /// instead of minting a fresh one.
    pub fn assign_index(
        &self,
        requested_trid: Option<Trid>,
        kind: TransactionKind,
        client: ClientIdentity,
    ) -> Result<TranIndex> {
        let mut slots = self.slots.write();
        let start = self.hint_free_index.load(Ordering::SeqCst).max(1) as usize;
        let found = (start..slots.len())
            .chain(1..start)
            .find(|&i| slots[i].is_none());

        let index = match found {
            Some(i) => i,
            None => {
                if self.recovery_complete.load(Ordering::SeqCst) && !self.expansion_allowed(slots.len()) {
                    return Err(TxnError::TooManyClients(self.config.max_clients));
                }
                let old_len = slots.len();
                let new_len = ((old_len as f32) * self.config.table_expand_ratio).ceil() as usize;
                let new_len = new_len.max(old_len + 1);
                slots.resize_with(new_len, || None);
                old_len
            }
        };

        let trid = requested_trid.unwrap_or_else(|| self.ids.new_trid());
        let tdes = Tdes::new(index as TranIndex, kind, client);
        tdes.set_trid(trid);
        slots[index] = Some(Arc::new(tdes));
        self.hint_free_index.store((index + 1) as i32, Ordering::SeqCst);
        self.num_assigned.fetch_add(1, Ordering::SeqCst);
        Ok(index as TranIndex)
    }

    fn expansion_allowed(&self, current_len: usize) -> bool {
        (current_len as i32) < self.config.max_clients.max(self.config.system_min_clients) * 4
    }

    /// Releases a slot back to the free pool, unless the TDES is a loose-end
    /// two-phase-commit participant: those stay occupied until the second
    /// phase resolves them (spec.md §4.9).
    pub fn release_index(&self, index: TranIndex) -> Result<()> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(index as usize)
            .ok_or(TxnError::UnknownTranIndex(index))?;
        match slot {
            Some(tdes) if tdes.is_loose_end() => Ok(()),
            Some(_) => {
                *slot = None;
                self.num_assigned.fetch_sub(1, Ordering::SeqCst);
                self.hint_free_index.store(index, Ordering::SeqCst);
                Ok(())
            }
            None => Err(TxnError::UnknownTranIndex(index)),
        }
    }

    /// Forces the release of a loose-end slot once its second phase
    /// resolves, bypassing the loose-end guard in [`Self::release_index`].
    pub fn force_release_index(&self, index: TranIndex) -> Result<()> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(index as usize)
            .ok_or(TxnError::UnknownTranIndex(index))?;
        if slot.take().is_some() {
            self.num_assigned.fetch_sub(1, Ordering::SeqCst);
            self.hint_free_index.store(index, Ordering::SeqCst);
            Ok(())
        } else {
            Err(TxnError::UnknownTranIndex(index))
        }
    }
}
