//! Top-level facade wiring the transaction table, MVCC table, id allocator,
//! and external collaborators together (spec.md §1, §6).
//!
//! Grounded in `examples/motedb-motedb/src/database/transaction.rs`'s
//! `TransactionCoordinator`: one owning struct holds every shared piece of
//! state and exposes the handful of operations callers actually need
//! (begin/commit/abort/kill/snapshot), instead of making every caller wire
//! the table, MVCC table, and collaborators together themselves.

use crate::error::{Result, TxnError};
use crate::txn::collab::{Authorizer, Clock, LockWaiter, LogRecordKind, LogSink, PageFixer};
use crate::txn::interrupt;
use crate::txn::introspect::{self, TdesSnapshotRow};
use crate::txn::mvcc::{self, MvccTable, Snapshot};
use crate::txn::sysop::{self, TopOpFrame};
use crate::txn::table::TranTable;
use crate::txn::tdes::Tdes;
use crate::txn::twophase::TwoPcState;
use crate::txn::types::{ClientIdentity, Lsa, Mvccid, TranIndex, TransactionKind, TransactionState, MVCCID_NULL};
use crate::txn::unique_stats::{Btid, Counters, GlobalUniqueStats};
use crate::txn::ids::IdAllocator;
use crate::TxnConfig;
use std::sync::Arc;

/// Owns every piece of shared transaction-subsystem state and the
/// collaborator handles it needs to drive them (spec.md §6). Cloning an
/// `Arc<TxnEngine>` and sharing it across worker threads is the intended
/// usage, the same way `TransactionCoordinator` is shared in the teacher.
pub struct TxnEngine {
    config: TxnConfig,
    ids: Arc<IdAllocator>,
    table: TranTable,
    mvcc_table: MvccTable,
    unique_stats: GlobalUniqueStats,
    log: Box<dyn LogSink>,
    pager: Box<dyn PageFixer>,
    waiter: Box<dyn LockWaiter>,
    clock: Box<dyn Clock>,
    authorizer: Box<dyn Authorizer>,
}

impl TxnEngine {
    pub fn new(
        config: TxnConfig,
        log: Box<dyn LogSink>,
        pager: Box<dyn PageFixer>,
        waiter: Box<dyn LockWaiter>,
        clock: Box<dyn Clock>,
        authorizer: Box<dyn Authorizer>,
    ) -> Self {
        let ids = Arc::new(IdAllocator::new());
        let table = TranTable::new(Arc::clone(&ids), config.clone());
        let mvcc_table = MvccTable::new(Arc::clone(&ids));
        Self {
            config,
            ids,
            table,
            mvcc_table,
            unique_stats: GlobalUniqueStats::new(),
            log,
            pager,
            waiter,
            clock,
            authorizer,
        }
    }

    pub fn table(&self) -> &TranTable {
        &self.table
    }

    pub fn tdes(&self, index: TranIndex) -> Result<Arc<Tdes>> {
        self.table.get(index).ok_or(TxnError::UnknownTranIndex(index))
    }

    /// Begins a new transaction and returns its table index.
    pub fn begin(&self, kind: TransactionKind, client: ClientIdentity) -> Result<TranIndex> {
        let index = self.table.assign_index(None, kind, client)?;
        let tdes = self.tdes(index)?;
        tdes.set_tran_start_ms(self.clock.now_ms());
        if self.config.read_only_mode {
            tdes.push_disable_modifications();
        }
        Ok(index)
    }

    /// Builds an MVCC snapshot for `index`, assigning it its own MVCCID
    /// first if it doesn't have one yet (spec.md §4.3: MVCCIDs are assigned
    /// lazily, on first need, not at `begin`).
    pub fn snapshot(&self, index: TranIndex) -> Result<Snapshot> {
        let tdes = self.tdes(index)?;
        let self_id = {
            let mut info = tdes.mvcc.write();
            if info.id == MVCCID_NULL {
                info.id = self.mvcc_table.assign_mvccid();
            }
            info.id
        };
        Ok(self.mvcc_table.build_snapshot(&self.table, self_id))
    }

    /// Whether `mvccid` is this transaction's own id or one of its still-open
    /// sub-transaction ids (spec.md §6, §8 Scenario F): lets a collaborator
    /// tell "this is mine" apart from "this is merely visible to me".
    pub fn is_current_mvccid(&self, index: TranIndex, mvccid: Mvccid) -> Result<bool> {
        let tdes = self.tdes(index)?;
        Ok(tdes.mvcc.read().is_current_mvccid(mvccid))
    }

    /// Begins a sub-transaction under `index` (spec.md §4.3, §9 Open
    /// Question 2): assigns a pair of consecutive MVCCIDs, keeping the first
    /// as the parent's own id if it doesn't have one yet and tracking the
    /// second as a sub id. The sub id becomes visible to other transactions'
    /// snapshots as soon as it is completed via [`Self::sub_mvcc_commit`],
    /// independent of the parent transaction's own state.
    pub fn sub_mvcc_begin(&self, index: TranIndex) -> Result<Mvccid> {
        let tdes = self.tdes(index)?;
        let mut info = tdes.mvcc.write();
        let sub_id = if info.id == MVCCID_NULL {
            let (parent_id, sub_id) = self.mvcc_table.assign_two_mvccids();
            info.id = parent_id;
            sub_id
        } else {
            self.mvcc_table.assign_mvccid()
        };
        info.sub_ids.push(sub_id);
        Ok(sub_id)
    }

    /// Completes a sub-transaction's MVCCID on its own, without waiting for
    /// the parent transaction to commit (spec.md §8 Scenario F).
    pub fn sub_mvcc_commit(&self, index: TranIndex, sub_id: Mvccid) -> Result<()> {
        let tdes = self.tdes(index)?;
        mvcc::complete_sub_mvcc(&self.mvcc_table, &tdes, sub_id);
        Ok(())
    }

    /// Commits a transaction: folds its unique-index stat deltas into the
    /// global table and reflects them to the B-tree roots they touched,
    /// completes its MVCCID (and any sub ids still open) so no other
    /// transaction can observe it as committed before the global counters
    /// are caught up, logs the commit, and frees its slot.
    pub fn commit(&self, index: TranIndex) -> Result<Lsa> {
        let tdes = self.tdes(index)?;
        if !tdes.state().is_active() {
            return Err(TxnError::NotActive(index));
        }
        tdes.set_state(TransactionState::Committed);
        let touched = self.unique_stats.commit_deltas(&tdes.unique_stats);
        for btid in touched {
            self.unique_stats.reflect_to_root(btid, self.pager.as_ref());
        }
        let sub_ids: Vec<Mvccid> = tdes.mvcc.read().sub_ids.clone();
        for sub_id in sub_ids {
            mvcc::complete_sub_mvcc(&self.mvcc_table, &tdes, sub_id);
        }
        mvcc::complete_mvcc(&self.mvcc_table, &tdes);
        tdes.count_opt.clear();
        let lsa = self.log.append(index, LogRecordKind::TranCommit, &[]);
        tdes.record_lsa(lsa);
        tdes.lsas.write().commit_abort_lsa = lsa;
        self.table.release_index(index)?;
        Ok(lsa)
    }

    /// Aborts a transaction: completes its MVCCID (and any sub ids still
    /// open), discards any unique-index deltas without reflecting them, logs
    /// the abort, releases its locks, and frees its slot.
    pub fn abort(&self, index: TranIndex) -> Result<Lsa> {
        let tdes = self.tdes(index)?;
        if !tdes.state().is_active() {
            return Err(TxnError::NotActive(index));
        }
        tdes.set_state(TransactionState::Aborted);
        let sub_ids: Vec<Mvccid> = tdes.mvcc.read().sub_ids.clone();
        for sub_id in sub_ids {
            mvcc::complete_sub_mvcc(&self.mvcc_table, &tdes, sub_id);
        }
        mvcc::complete_mvcc(&self.mvcc_table, &tdes);
        tdes.unique_stats.clear();
        tdes.count_opt.clear();
        let lsa = self.log.append(index, LogRecordKind::TranAbort, &[]);
        tdes.record_lsa(lsa);
        tdes.lsas.write().commit_abort_lsa = lsa;
        self.waiter.release_all(index);
        self.table.release_index(index)?;
        Ok(lsa)
    }

    pub fn sysop_begin(&self, index: TranIndex) -> Result<TopOpFrame> {
        let tdes = self.tdes(index)?;
        Ok(sysop::begin(&tdes, self.log.as_ref()))
    }

    pub fn sysop_commit(&self, index: TranIndex) -> Result<Lsa> {
        let tdes = self.tdes(index)?;
        sysop::end_commit(&tdes, self.log.as_ref())
    }

    pub fn sysop_abort(&self, index: TranIndex) -> Result<Lsa> {
        let tdes = self.tdes(index)?;
        sysop::end_abort(&tdes, self.log.as_ref())
    }

    pub fn sysop_attach_to_outer(&self, index: TranIndex) -> Result<()> {
        let tdes = self.tdes(index)?;
        sysop::attach_to_outer(&tdes)
    }

    pub fn record_unique_delta(&self, index: TranIndex, btid: Btid, delta: Counters) -> Result<()> {
        let tdes = self.tdes(index)?;
        tdes.unique_stats.record_delta(btid, delta);
        Ok(())
    }

    /// Starts this transaction as a two-phase-commit coordinator.
    pub fn start_two_phase(&self, index: TranIndex, gtrid: i64, participants: Vec<String>) -> Result<()> {
        let tdes = self.tdes(index)?;
        *tdes.two_pc.write() = Some(TwoPcState::new(gtrid, participants));
        tdes.set_state(TransactionState::TwoPcCollectingVotes);
        Ok(())
    }

    /// Records one participant's vote; marks the TDES a loose end once every
    /// vote is in but the caller hasn't yet driven the second phase
    /// (spec.md §4.9).
    pub fn record_two_phase_vote(&self, index: TranIndex, participant: &str, commit: bool) -> Result<bool> {
        let tdes = self.tdes(index)?;
        let mut guard = tdes.two_pc.write();
        let state = guard.as_mut().ok_or(TxnError::NotActive(index))?;
        let all_voted = state.record_vote(participant, commit);
        tdes.set_state(state.in_progress_state());
        if all_voted {
            tdes.set_loose_end(true);
        }
        Ok(all_voted)
    }

    pub fn interrupt(&self, index: TranIndex, requester: &ClientIdentity) -> Result<()> {
        interrupt::interrupt_tran_index(&self.table, index, requester, self.authorizer.as_ref(), self.waiter.as_ref())
    }

    pub fn kill(&self, index: TranIndex, requester: &ClientIdentity, expected_pid: Option<i32>) -> Result<()> {
        interrupt::kill_tran_index(
            &self.table,
            index,
            requester,
            expected_pid,
            self.authorizer.as_ref(),
            self.waiter.as_ref(),
            &self.config,
        )
    }

    pub fn snapshot_table(&self) -> Vec<TdesSnapshotRow> {
        introspect::snapshot_table(&self.table)
    }

    /// The worker's cooperative check point (spec.md §4.8): returns
    /// `Interrupted` if a kill/interrupt/timeout was signaled since the last
    /// check, and drives the transaction's own query-timeout deadline at the
    /// same time. Callers are expected to call this between index/heap
    /// operations and at every lock-wait boundary.
    pub fn check_interrupt(&self, index: TranIndex) -> Result<()> {
        let tdes = self.tdes(index)?;
        interrupt::check_timeout(&self.table, &tdes, self.clock.as_ref())?;
        interrupt::check_interrupt(&self.table, &tdes)
    }

    /// Process-wide count of interrupt flags set but not yet observed
    /// (spec.md §4.8).
    pub fn num_interrupts(&self) -> i32 {
        self.table.num_interrupts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::collab::fakes::{InMemoryLogSink, InMemoryPageFixer, ManualClock, NullLockWaiter, SetAuthorizer};
    use crate::txn::unique_stats::Counters;

    fn test_engine() -> TxnEngine {
        TxnEngine::new(
            TxnConfig::for_testing(),
            Box::new(InMemoryLogSink::default()),
            Box::new(InMemoryPageFixer::default()),
            Box::new(NullLockWaiter::default()),
            Box::new(ManualClock::new(0)),
            Box::new(SetAuthorizer { dba_logins: vec!["dba".to_string()] }),
        )
    }

    #[test]
    fn begin_commit_releases_the_slot() {
        let engine = test_engine();
        let idx = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        assert!(engine.tdes(idx).is_ok());
        engine.commit(idx).unwrap();
        assert!(engine.tdes(idx).is_err());
    }

    #[test]
    fn commit_advances_tail_lsa_and_records_commit_abort_lsa() {
        let engine = test_engine();
        let idx = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        let tdes = engine.tdes(idx).unwrap();
        assert!(tdes.lsas.read().head_lsa.is_null());
        let lsa = engine.commit(idx).unwrap();
        assert_eq!(tdes.lsas.read().tail_lsa, lsa);
        assert_eq!(tdes.lsas.read().head_lsa, lsa);
        assert_eq!(tdes.lsas.read().commit_abort_lsa, lsa);
    }

    #[test]
    fn committing_twice_fails_with_not_active() {
        let engine = test_engine();
        let idx = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        engine.commit(idx).unwrap();
        let idx2 = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        assert_ne!(idx, idx2);
    }

    #[test]
    fn unique_stats_reflect_to_root_on_commit_but_not_on_abort() {
        let engine = test_engine();
        let idx = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        engine.record_unique_delta(idx, 1, Counters { keys: 1, oids: 1, nulls: 0 }).unwrap();
        engine.commit(idx).unwrap();
        assert_eq!(engine.unique_stats.get(1), Counters { keys: 1, oids: 1, nulls: 0 });

        let idx2 = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        engine.record_unique_delta(idx2, 2, Counters { keys: 5, oids: 5, nulls: 0 }).unwrap();
        engine.abort(idx2).unwrap();
        assert_eq!(engine.unique_stats.get(2), Counters::default());
    }

    #[test]
    fn two_transactions_do_not_see_each_other_until_commit() {
        let engine = test_engine();
        let idx1 = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        let idx2 = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        engine.snapshot(idx2).unwrap();
        let tdes2_id = engine.tdes(idx2).unwrap().mvcc.read().id;
        let snap1 = engine.snapshot(idx1).unwrap();
        assert!(snap1.active_ids.contains(&tdes2_id));
        assert!(!snap1.is_visible(tdes2_id));
    }

    #[test]
    fn query_timeout_trips_the_check_point_and_leaves_num_interrupts_unchanged() {
        // spec.md §8 Scenario E.
        let clock = Arc::new(ManualClock::new(0));
        let engine = TxnEngine::new(
            TxnConfig::for_testing(),
            Box::new(InMemoryLogSink::default()),
            Box::new(InMemoryPageFixer::default()),
            Box::new(NullLockWaiter::default()),
            Box::new(Arc::clone(&clock)),
            Box::new(SetAuthorizer { dba_logins: vec!["dba".to_string()] }),
        );
        let idx = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        engine.tdes(idx).unwrap().set_query_deadline(0, 500);
        let before = engine.num_interrupts();

        clock.advance(600);
        let err = engine.check_interrupt(idx).unwrap_err();
        assert_eq!(err, TxnError::Interrupted);
        assert_eq!(engine.num_interrupts(), before);

        // One-shot: the next check point sees a clean slate (deadline only
        // fires once) unless the caller re-arms it.
        engine.tdes(idx).unwrap().clear_query_deadline();
        assert!(engine.check_interrupt(idx).is_ok());
    }

    #[test]
    fn kill_requires_authorization() {
        let engine = test_engine();
        let idx = engine.begin(TransactionKind::Worker, ClientIdentity { login_name: "alice".into(), ..Default::default() }).unwrap();
        let mallory = ClientIdentity { login_name: "mallory".into(), ..Default::default() };
        let err = engine.interrupt(idx, &mallory).unwrap_err();
        assert_eq!(err, TxnError::KillNotAllowed(idx));
    }

    #[test]
    fn sub_mvcc_commit_is_visible_before_the_parent_transaction_commits() {
        // spec.md §8 Scenario F.
        let engine = test_engine();
        let parent = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        let other = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();

        let sub_id = engine.sub_mvcc_begin(parent).unwrap();
        assert!(engine.is_current_mvccid(parent, sub_id).unwrap());
        assert!(!engine.is_current_mvccid(other, sub_id).unwrap());

        let snap_before = engine.snapshot(other).unwrap();
        assert!(snap_before.active_ids.contains(&sub_id));

        engine.sub_mvcc_commit(parent, sub_id).unwrap();
        assert!(!engine.tdes(parent).unwrap().mvcc.read().sub_ids.contains(&sub_id));
        let snap_after = engine.snapshot(other).unwrap();
        assert!(snap_after.is_visible(sub_id));

        // The parent transaction itself is still active.
        assert!(engine.tdes(parent).unwrap().state().is_active());
    }

    #[test]
    fn committing_the_parent_completes_any_still_open_sub_ids() {
        let engine = test_engine();
        let parent = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        let other = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        let sub_id = engine.sub_mvcc_begin(parent).unwrap();

        engine.commit(parent).unwrap();

        let snap = engine.snapshot(other).unwrap();
        assert!(snap.is_visible(sub_id));
    }

    #[test]
    fn commit_folds_unique_stat_deltas_before_completing_the_mvccid() {
        // spec.md §4.3: a concurrent snapshot must never observe the writer
        // as committed while the global unique-stat counters are stale.
        let engine = test_engine();
        let idx = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        engine.record_unique_delta(idx, 9, Counters { keys: 3, oids: 3, nulls: 0 }).unwrap();
        engine.commit(idx).unwrap();
        assert_eq!(engine.unique_stats.get(9), Counters { keys: 3, oids: 3, nulls: 0 });
    }

    #[test]
    fn two_phase_becomes_loose_end_once_every_vote_is_in() {
        let engine = test_engine();
        let idx = engine.begin(TransactionKind::Worker, ClientIdentity::default()).unwrap();
        engine.start_two_phase(idx, 1, vec!["a".into(), "b".into()]).unwrap();
        assert!(!engine.record_two_phase_vote(idx, "a", true).unwrap());
        assert!(engine.record_two_phase_vote(idx, "b", true).unwrap());
        assert!(engine.tdes(idx).unwrap().is_loose_end());
    }
}
