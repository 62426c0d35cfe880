//! C5: nested system operations ("top operations", spec.md §4.5).
//!
//! A system operation brackets a sequence of log records that must commit or
//! abort as one atomic unit *inside* a still-open transaction — the
//! mechanism index/heap code uses to make a multi-page B-tree rebalance or a
//! cascaded delete crash-safe without waiting for the enclosing transaction
//! to finish. Operations nest, so each TDES keeps a stack of frames; the
//! stack itself is protected by a reentrant lock because the thread already
//! holding it is exactly the thread allowed to push another frame on top
//! (spec.md §9: "Reentrant mutex").
//!
//! Grounded in `log_sysop_start` / `log_sysop_commit` / `log_sysop_abort` /
//! `log_sysop_attach_to_outer` and `logtb_realloc_topops_stack` in
//! `examples/original_source/src/transaction/log_tran_table.c`; the stack
//! grows in increments of 3 there (`LOG_TOPOPS_STACK_INCREMENT`), which this
//! module mirrors via `reserve` rather than letting `Vec` pick its own
//! growth factor.

use crate::error::{Result, TxnError};
use crate::txn::collab::{LogRecordKind, LogSink};
use crate::txn::tdes::Tdes;
use crate::txn::types::{Lsa, TranIndex};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;

/// Matches `LOG_TOPOPS_STACK_INCREMENT` in the source.
const TOPOPS_STACK_INCREMENT: usize = 3;

/// One nested system operation's bookkeeping: the parent's LSA at the point
/// the operation started, and the post-commit LSA position to roll forward
/// to on a logical-undo-only end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopOpFrame {
    pub lastparent_lsa: Lsa,
    pub posp_lsa: Lsa,
}

#[derive(Debug, Default)]
pub struct TopOpsStackInner {
    frames: Vec<TopOpFrame>,
}

impl TopOpsStackInner {
    fn reserve_increment(&mut self) {
        if self.frames.len() == self.frames.capacity() {
            self.frames.reserve(TOPOPS_STACK_INCREMENT);
        }
    }
}

/// Per-TDES stack of open system operations, behind a reentrant mutex: the
/// owning thread can call `begin` again while already holding it (nested
/// sysops), but a different thread touching the same TDES concurrently
/// blocks like an ordinary mutex.
#[derive(Default)]
pub struct TopOpsStack {
    inner: ReentrantMutex<RefCell<TopOpsStackInner>>,
}

impl TopOpsStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().borrow().frames.len()
    }

    fn push(&self, frame: TopOpFrame) {
        let guard = self.inner.lock();
        let mut stack = guard.borrow_mut();
        stack.reserve_increment();
        stack.frames.push(frame);
    }

    fn pop(&self) -> Option<TopOpFrame> {
        self.inner.lock().borrow_mut().frames.pop()
    }

    fn peek(&self) -> Option<TopOpFrame> {
        self.inner.lock().borrow().frames.last().copied()
    }
}

/// Sets `topop_lsa` to the current top frame's `lastparent_lsa`, or null if
/// the stack is now empty (spec.md §3 invariant: `topop_lsa` tracks
/// `topops.stack[last].lastparent_lsa` whenever the stack is non-empty).
fn sync_topop_lsa(tdes: &Tdes) {
    tdes.lsas.write().topop_lsa = tdes.topops.peek().map(|f| f.lastparent_lsa).unwrap_or_default();
}

/// Begins a nested system operation, capturing the transaction's current
/// tail LSA as the new frame's `lastparent_lsa`.
pub fn begin(tdes: &Tdes, log: &dyn LogSink) -> TopOpFrame {
    let lastparent_lsa = tdes.lsas.read().tail_lsa;
    let start_lsa = log.append(tdes.index, LogRecordKind::SysopStart, &[]);
    tdes.record_lsa(start_lsa);
    let frame = TopOpFrame { lastparent_lsa, posp_lsa: start_lsa };
    tdes.topops.push(frame);
    sync_topop_lsa(tdes);
    frame
}

/// Commits the innermost open system operation: its changes become
/// permanent regardless of what happens to the enclosing transaction.
pub fn end_commit(tdes: &Tdes, log: &dyn LogSink) -> Result<Lsa> {
    let frame = tdes
        .topops
        .pop()
        .ok_or(TxnError::NoActiveSysop(tdes.index))?;
    let lsa = log.append(
        tdes.index,
        LogRecordKind::SysopEndCommit { lastparent_lsa: frame.lastparent_lsa },
        &[],
    );
    tdes.record_lsa(lsa);
    tdes.lsas.write().tail_topresult_lsa = lsa;
    sync_topop_lsa(tdes);
    Ok(lsa)
}

/// Aborts the innermost open system operation, rolling its changes back
/// without touching anything outside the frame. Per spec.md §8 property 4,
/// `tail_lsa` afterward equals the frame's `lastparent_lsa` exactly as it
/// was at `begin` — the abort record itself, and everything the sysop wrote,
/// is undone rather than extending the transaction's visible tail.
pub fn end_abort(tdes: &Tdes, log: &dyn LogSink) -> Result<Lsa> {
    let frame = tdes
        .topops
        .pop()
        .ok_or(TxnError::NoActiveSysop(tdes.index))?;
    let lsa = log.append(
        tdes.index,
        LogRecordKind::SysopEndAbort { lastparent_lsa: frame.lastparent_lsa },
        &[],
    );
    tdes.rewind_tail_lsa(frame.lastparent_lsa);
    tdes.lsas.write().undo_nxlsa = frame.lastparent_lsa;
    sync_topop_lsa(tdes);
    Ok(lsa)
}

/// Ends the innermost system operation by folding its log records into the
/// enclosing operation/transaction as plain undo-only records, rather than
/// emitting a commit or abort boundary. Used when the caller wants the work
/// done but doesn't want it to stand as its own atomic unit (e.g. a
/// best-effort cleanup pass).
pub fn end_logical_undo(tdes: &Tdes, log: &dyn LogSink) -> Result<Lsa> {
    tdes.topops.pop().ok_or(TxnError::NoActiveSysop(tdes.index))?;
    let lsa = log.append(tdes.index, LogRecordKind::SysopEndLogicalUndo, &[]);
    tdes.record_lsa(lsa);
    sync_topop_lsa(tdes);
    Ok(lsa)
}

/// Ends the innermost system operation without emitting any boundary
/// record at all, attaching its already-written log records directly to
/// the parent operation (or the transaction, if there is no parent). The
/// parent inherits responsibility for undoing them.
pub fn attach_to_outer(tdes: &Tdes) -> Result<()> {
    tdes.topops.pop().ok_or(TxnError::NoActiveSysop(tdes.index))?;
    sync_topop_lsa(tdes);
    Ok(())
}

pub fn current_frame(tdes: &Tdes) -> Option<TopOpFrame> {
    tdes.topops.peek()
}

pub fn depth(tdes: &Tdes) -> usize {
    tdes.topops.depth()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::collab::fakes::InMemoryLogSink;
    use crate::txn::tdes::Tdes;
    use crate::txn::types::{ClientIdentity, TransactionKind};

    fn fresh_tdes(index: TranIndex) -> Tdes {
        Tdes::new(index, TransactionKind::Worker, ClientIdentity::default())
    }

    #[test]
    fn sysops_nest_and_unwind_in_lifo_order() {
        let tdes = fresh_tdes(1);
        let log = InMemoryLogSink::default();
        begin(&tdes, &log);
        begin(&tdes, &log);
        assert_eq!(depth(&tdes), 2);
        end_commit(&tdes, &log).unwrap();
        assert_eq!(depth(&tdes), 1);
        end_abort(&tdes, &log).unwrap();
        assert_eq!(depth(&tdes), 0);
    }

    #[test]
    fn sysop_abort_rewinds_tail_lsa_to_the_frames_lastparent_lsa() {
        // spec.md §8 property 4 / Scenario B: after a row insert (simulated
        // here as a direct log append) followed by a sysop that aborts,
        // tail_lsa must equal exactly what it was when the sysop began.
        let tdes = fresh_tdes(5);
        let log = InMemoryLogSink::default();
        let insert_lsa = log.append(tdes.index, LogRecordKind::TranCommit, &[]);
        tdes.record_lsa(insert_lsa);
        let lastparent_before = tdes.lsas.read().tail_lsa;

        let frame = begin(&tdes, &log);
        assert_eq!(frame.lastparent_lsa, lastparent_before);
        log.append(tdes.index, LogRecordKind::TranCommit, &[]); // simulated B-tree split records
        end_abort(&tdes, &log).unwrap();

        assert_eq!(tdes.lsas.read().tail_lsa, lastparent_before);
        assert_eq!(depth(&tdes), 0);
    }

    #[test]
    fn topop_lsa_tracks_the_open_frames_lastparent_lsa() {
        let tdes = fresh_tdes(6);
        let log = InMemoryLogSink::default();
        assert!(tdes.lsas.read().topop_lsa.is_null());
        let frame1 = begin(&tdes, &log);
        assert_eq!(tdes.lsas.read().topop_lsa, frame1.lastparent_lsa);
        let frame2 = begin(&tdes, &log);
        assert_eq!(tdes.lsas.read().topop_lsa, frame2.lastparent_lsa);
        end_commit(&tdes, &log).unwrap();
        assert_eq!(tdes.lsas.read().topop_lsa, frame1.lastparent_lsa);
        end_commit(&tdes, &log).unwrap();
        assert!(tdes.lsas.read().topop_lsa.is_null());
    }

    #[test]
    fn ending_with_no_open_sysop_is_an_error() {
        let tdes = fresh_tdes(2);
        let log = InMemoryLogSink::default();
        assert_eq!(end_commit(&tdes, &log), Err(TxnError::NoActiveSysop(2)));
    }

    #[test]
    fn attach_to_outer_pops_without_emitting_a_boundary_record() {
        let tdes = fresh_tdes(3);
        let log = InMemoryLogSink::default();
        begin(&tdes, &log);
        attach_to_outer(&tdes).unwrap();
        assert_eq!(depth(&tdes), 0);
        assert_eq!(log.records.lock().len(), 1);
    }

    #[test]
    fn reentrant_from_same_thread_does_not_deadlock() {
        let tdes = fresh_tdes(4);
        let log = InMemoryLogSink::default();
        let _frame = begin(&tdes, &log);
        let depth_seen = {
            let _again = begin(&tdes, &log);
            depth(&tdes)
        };
        assert_eq!(depth_seen, 2);
    }
}
