//! C4: the transaction descriptor and its lifecycle (spec.md §3, §4.4).
//!
//! Grounded in the `LOG_TDES` struct and `logtb_initialize_tdes` /
//! `logtb_clear_tdes` / `logtb_finalize_tdes` in
//! `examples/original_source/src/transaction/log_tran_table.c`, reshaped the
//! way `examples/motedb-motedb/src/database/transaction.rs` shapes its
//! `TransactionContext`: one struct per slot, fields behind the smallest
//! lock that covers them, atomics for anything read far more than written.

use crate::txn::count_opt::CountOptCache;
use crate::txn::mvcc::MvccInfo;
use crate::txn::sysop::TopOpsStack;
use crate::txn::twophase::TwoPcState;
use crate::txn::types::{
    AbortReason, ClientIdentity, IsolationLevel, Lsa, TranIndex, TransactionKind, TransactionState,
    Trid, WaitMsecs, NULL_TRANID,
};
use crate::txn::unique_stats::TranUniqueStats;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU8, Ordering};

/// LSA bookkeeping carried on every TDES (spec.md §3). `tail_lsa` is the
/// transaction's last-written record; `undo_nxlsa` is where rollback resumes
/// if interrupted partway; `savepoint_lsa`/`topop_lsa` cache the most recent
/// of each to skip a linked-list walk on the common case.
#[derive(Debug, Clone, Copy, Default)]
pub struct LsaMarkers {
    pub head_lsa: Lsa,
    pub tail_lsa: Lsa,
    pub undo_nxlsa: Lsa,
    pub posp_nxlsa: Lsa,
    pub savepoint_lsa: Lsa,
    pub topop_lsa: Lsa,
    /// LSA of the last committed sysop result (spec.md §3:
    /// `tail_topresult_lsa`) — the boundary record of the most recent
    /// `sysop_commit`, distinct from `tail_lsa` once more ordinary records
    /// have been appended after it.
    pub tail_topresult_lsa: Lsa,
    /// LSA of this transaction's own commit or abort record (spec.md §3:
    /// `commit_abort_lsa`).
    pub commit_abort_lsa: Lsa,
}

/// Recovery-time-only markers, meaningful solely while the transaction table
/// is being rebuilt from the log; ignored once `recovery_complete` is set on
/// the owning [`crate::txn::table::TranTable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryMarkers {
    pub checkpoint_lsa: Lsa,
    pub is_recovered_loose_end: bool,
    /// Where the transaction's postponed-redo chain started (spec.md §3).
    pub tran_start_postpone_lsa: Lsa,
    /// Where the current sysop's postponed-redo chain started.
    pub sysop_start_postpone_lsa: Lsa,
    /// Start of the innermost atomic sysop still open when the log ended.
    pub atomic_sysop_start_lsa: Lsa,
    /// The last aborted sysop's end-LSA observed during analysis.
    pub analysis_last_aborted_sysop_lsa: Lsa,
    /// That same aborted sysop's start-LSA.
    pub analysis_last_aborted_sysop_start_lsa: Lsa,
}

fn state_to_u8(state: TransactionState) -> u8 {
    match state {
        TransactionState::Active => 0,
        TransactionState::Committed => 1,
        TransactionState::Aborted => 2,
        TransactionState::UnilaterallyAborted => 3,
        TransactionState::TwoPcPrepared => 4,
        TransactionState::TwoPcCollectingVotes => 5,
        TransactionState::TwoPcSecondPhase => 6,
        TransactionState::Unknown => 7,
    }
}

fn u8_to_state(raw: u8) -> TransactionState {
    match raw {
        0 => TransactionState::Active,
        1 => TransactionState::Committed,
        2 => TransactionState::Aborted,
        3 => TransactionState::UnilaterallyAborted,
        4 => TransactionState::TwoPcPrepared,
        5 => TransactionState::TwoPcCollectingVotes,
        6 => TransactionState::TwoPcSecondPhase,
        _ => TransactionState::Unknown,
    }
}

/// A transaction descriptor. One lives in every occupied transaction-table
/// slot. Most fields accept concurrent access from the owning worker thread
/// and from introspection/kill callers on other threads; each field picks
/// the cheapest synchronization that's still correct for that mix.
pub struct Tdes {
    pub index: TranIndex,
    pub kind: TransactionKind,

    trid: AtomicI32,
    state: AtomicU8,
    isolation: RwLock<IsolationLevel>,
    wait_msecs: RwLock<WaitMsecs>,
    abort_reason: RwLock<AbortReason>,

    pub lsas: RwLock<LsaMarkers>,
    pub recovery: RwLock<RecoveryMarkers>,
    pub topops: TopOpsStack,
    pub mvcc: RwLock<MvccInfo>,
    pub client: RwLock<ClientIdentity>,
    pub unique_stats: TranUniqueStats,
    pub count_opt: CountOptCache,
    pub two_pc: RwLock<Option<TwoPcState>>,
    pub savepoints: RwLock<HashMap<String, Lsa>>,
    pub modified_classes: RwLock<std::collections::HashSet<u64>>,

    interrupted: AtomicBool,
    is_loose_end: AtomicBool,
    disable_modifications: AtomicI32,
    query_start_ms: AtomicI64,
    query_timeout_ms: AtomicI64,
    tran_start_ms: AtomicI64,
}

impl Tdes {
    pub fn new(index: TranIndex, kind: TransactionKind, client: ClientIdentity) -> Self {
        Self {
            index,
            kind,
            trid: AtomicI32::new(NULL_TRANID),
            state: AtomicU8::new(state_to_u8(TransactionState::Active)),
            isolation: RwLock::new(IsolationLevel::default()),
            wait_msecs: RwLock::new(WaitMsecs::default()),
            abort_reason: RwLock::new(AbortReason::default()),
            lsas: RwLock::new(LsaMarkers::default()),
            recovery: RwLock::new(RecoveryMarkers::default()),
            topops: TopOpsStack::new(),
            mvcc: RwLock::new(MvccInfo::default()),
            client: RwLock::new(client),
            unique_stats: TranUniqueStats::new(),
            count_opt: CountOptCache::new(),
            two_pc: RwLock::new(None),
            savepoints: RwLock::new(HashMap::new()),
            modified_classes: RwLock::new(std::collections::HashSet::new()),
            interrupted: AtomicBool::new(false),
            is_loose_end: AtomicBool::new(false),
            disable_modifications: AtomicI32::new(0),
            query_start_ms: AtomicI64::new(0),
            query_timeout_ms: AtomicI64::new(0),
            tran_start_ms: AtomicI64::new(0),
        }
    }

    pub fn trid(&self) -> Trid {
        self.trid.load(Ordering::SeqCst)
    }

    pub fn set_trid(&self, trid: Trid) {
        self.trid.store(trid, Ordering::SeqCst);
    }

    pub fn state(&self) -> TransactionState {
        u8_to_state(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: TransactionState) {
        self.state.store(state_to_u8(state), Ordering::SeqCst);
    }

    pub fn isolation(&self) -> IsolationLevel {
        *self.isolation.read()
    }

    pub fn set_isolation(&self, level: IsolationLevel) {
        *self.isolation.write() = level;
    }

    pub fn wait_msecs(&self) -> WaitMsecs {
        *self.wait_msecs.read()
    }

    pub fn set_wait_msecs(&self, wait: WaitMsecs) {
        *self.wait_msecs.write() = wait;
    }

    pub fn abort_reason(&self) -> AbortReason {
        *self.abort_reason.read()
    }

    pub fn set_abort_reason(&self, reason: AbortReason) {
        *self.abort_reason.write() = reason;
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn set_interrupted(&self, value: bool) {
        self.interrupted.store(value, Ordering::SeqCst);
    }

    pub fn is_loose_end(&self) -> bool {
        self.is_loose_end.load(Ordering::SeqCst)
    }

    pub fn set_loose_end(&self, value: bool) {
        self.is_loose_end.store(value, Ordering::SeqCst);
    }

    /// > 0 while any nested scope has asked for modifications to be
    /// refused (read-only mode, a read-only savepoint region); nests via
    /// a counter rather than a bool so scopes can overlap.
    pub fn disable_modifications(&self) -> bool {
        self.disable_modifications.load(Ordering::SeqCst) > 0
    }

    pub fn push_disable_modifications(&self) {
        self.disable_modifications.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pop_disable_modifications(&self) {
        self.disable_modifications.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn query_timeout_ms(&self) -> i64 {
        self.query_timeout_ms.load(Ordering::SeqCst)
    }

    pub fn query_start_ms(&self) -> i64 {
        self.query_start_ms.load(Ordering::SeqCst)
    }

    pub fn set_query_deadline(&self, start_ms: i64, timeout_ms: i64) {
        self.query_start_ms.store(start_ms, Ordering::SeqCst);
        self.query_timeout_ms.store(
            if timeout_ms <= 0 { 0 } else { start_ms + timeout_ms },
            Ordering::SeqCst,
        );
    }

    pub fn clear_query_deadline(&self) {
        self.query_timeout_ms.store(0, Ordering::SeqCst);
    }

    pub fn query_deadline(&self) -> Option<i64> {
        let deadline = self.query_timeout_ms.load(Ordering::SeqCst);
        if deadline == 0 {
            None
        } else {
            Some(deadline)
        }
    }

    /// Appends `lsa` to this transaction's log-record chain: sets `head_lsa`
    /// if this is the first record, and advances `tail_lsa` (spec.md §3:
    /// `head_lsa ≤ tail_lsa`; §8 property 1: `tail_lsa` monotonically
    /// non-decreasing). Every call site that appends a log record for this
    /// transaction must route the returned LSA through here.
    pub fn record_lsa(&self, lsa: Lsa) {
        let mut lsas = self.lsas.write();
        if lsas.head_lsa.is_null() {
            lsas.head_lsa = lsa;
        }
        lsas.tail_lsa = lsa;
    }

    /// Rewinds `tail_lsa` to `lsa` without touching `head_lsa` — used only by
    /// `sysop_abort` (spec.md §4.5, §8 property 4), which undoes every record
    /// back to the frame's `lastparent_lsa` so the transaction's effective
    /// tail afterward is as if the sysop had never run.
    pub fn rewind_tail_lsa(&self, lsa: Lsa) {
        self.lsas.write().tail_lsa = lsa;
    }

    pub fn tran_start_ms(&self) -> i64 {
        self.tran_start_ms.load(Ordering::SeqCst)
    }

    pub fn set_tran_start_ms(&self, ms: i64) {
        self.tran_start_ms.store(ms, Ordering::SeqCst);
    }

    /// Records a named savepoint at the transaction's current `tail_lsa`
    /// (spec.md §3: `savept_lsa`). A later savepoint with the same name
    /// overwrites the earlier one, matching the source's "latest savepoint"
    /// semantics for `savept_lsa`.
    pub fn set_savepoint(&self, name: &str) -> Lsa {
        let lsa = self.lsas.read().tail_lsa;
        self.lsas.write().savepoint_lsa = lsa;
        self.savepoints.write().insert(name.to_string(), lsa);
        lsa
    }

    /// Looks up the LSA a named savepoint was taken at.
    pub fn find_savepoint(&self, name: &str) -> crate::error::Result<Lsa> {
        self.savepoints
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| crate::error::TxnError::UnknownSavepoint(name.to_string(), self.index))
    }

    /// Drops every savepoint taken after `cutoff`, called once a rollback
    /// to an earlier savepoint (or the transaction's end) invalidates them.
    pub fn discard_savepoints_after(&self, cutoff: Lsa) {
        self.savepoints.write().retain(|_, lsa| *lsa <= cutoff);
    }

    /// Resets every field to the state a freshly assigned TDES should start
    /// in, for slot reuse (`logtb_clear_tdes`). Leaves `index` and `kind`
    /// untouched — those are fixed for the life of the slot's current
    /// occupant and get overwritten by the table on reassignment instead.
    pub fn clear(&self) {
        self.set_trid(NULL_TRANID);
        self.set_state(TransactionState::Active);
        *self.isolation.write() = IsolationLevel::default();
        *self.wait_msecs.write() = WaitMsecs::default();
        *self.abort_reason.write() = AbortReason::default();
        *self.lsas.write() = LsaMarkers::default();
        *self.recovery.write() = RecoveryMarkers::default();
        *self.mvcc.write() = MvccInfo::default();
        self.unique_stats.clear();
        self.count_opt.clear();
        *self.two_pc.write() = None;
        self.savepoints.write().clear();
        self.modified_classes.write().clear();
        self.set_interrupted(false);
        self.set_loose_end(false);
        self.disable_modifications.store(0, Ordering::SeqCst);
        self.query_start_ms.store(0, Ordering::SeqCst);
        self.query_timeout_ms.store(0, Ordering::SeqCst);
        self.tran_start_ms.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tdes() -> Tdes {
        Tdes::new(3, TransactionKind::Worker, ClientIdentity::default())
    }

    #[test]
    fn fresh_tdes_starts_active_with_no_trid() {
        let tdes = new_tdes();
        assert_eq!(tdes.state(), TransactionState::Active);
        assert_eq!(tdes.trid(), NULL_TRANID);
        assert!(!tdes.is_interrupted());
    }

    #[test]
    fn clear_resets_everything_but_index_and_kind() {
        let tdes = new_tdes();
        tdes.set_trid(42);
        tdes.set_state(TransactionState::Committed);
        tdes.set_interrupted(true);
        tdes.savepoints.write().insert("s1".into(), Lsa::new(1, 1));
        tdes.clear();
        assert_eq!(tdes.trid(), NULL_TRANID);
        assert_eq!(tdes.state(), TransactionState::Active);
        assert!(!tdes.is_interrupted());
        assert!(tdes.savepoints.read().is_empty());
        assert_eq!(tdes.index, 3);
        assert_eq!(tdes.kind, TransactionKind::Worker);
    }

    #[test]
    fn savepoint_lookup_fails_for_an_unknown_name() {
        let tdes = new_tdes();
        tdes.lsas.write().tail_lsa = Lsa::new(1, 10);
        let lsa = tdes.set_savepoint("s1");
        assert_eq!(tdes.find_savepoint("s1"), Ok(lsa));
        assert_eq!(
            tdes.find_savepoint("missing"),
            Err(crate::error::TxnError::UnknownSavepoint("missing".into(), tdes.index))
        );
    }

    #[test]
    fn discard_savepoints_after_cutoff_keeps_only_earlier_ones() {
        let tdes = new_tdes();
        tdes.lsas.write().tail_lsa = Lsa::new(1, 1);
        tdes.set_savepoint("early");
        tdes.lsas.write().tail_lsa = Lsa::new(1, 10);
        tdes.set_savepoint("late");
        tdes.discard_savepoints_after(Lsa::new(1, 5));
        assert!(tdes.find_savepoint("early").is_ok());
        assert!(tdes.find_savepoint("late").is_err());
    }

    #[test]
    fn disable_modifications_nests() {
        let tdes = new_tdes();
        assert!(!tdes.disable_modifications());
        tdes.push_disable_modifications();
        tdes.push_disable_modifications();
        assert!(tdes.disable_modifications());
        tdes.pop_disable_modifications();
        assert!(tdes.disable_modifications());
        tdes.pop_disable_modifications();
        assert!(!tdes.disable_modifications());
    }

    #[test]
    fn query_deadline_zero_timeout_means_no_deadline() {
        let tdes = new_tdes();
        tdes.set_query_deadline(1_000, 0);
        assert_eq!(tdes.query_deadline(), None);
        tdes.set_query_deadline(1_000, 500);
        assert_eq!(tdes.query_deadline(), Some(1_500));
    }
}
