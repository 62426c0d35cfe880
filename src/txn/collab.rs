//! Trait seams for the external collaborators named in spec.md §6.
//!
//! This crate implements the transaction subsystem only: the page buffer,
//! disk volume manager, B-tree/heap record managers, lock manager, and WAL
//! writer are owned by other subsystems. The core calls them through these
//! traits; it never constructs a concrete storage or lock engine itself.
//!
//! `fakes` provides minimal in-memory implementations sufficient for this
//! crate's own test suite, the same way the teacher's tests fake a
//! `TempDir`-backed WAL rather than standing up a real disk volume manager.

use crate::txn::types::{Lsa, TranIndex};

/// What kind of WAL record a sysop or transaction boundary needs appended.
/// Payloads are opaque to this crate (`Vec<u8>`) — encoding the undo/redo
/// content is the B-tree/heap layer's job, per spec.md §1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecordKind {
    SysopStart,
    SysopEndCommit { lastparent_lsa: Lsa },
    SysopEndAbort { lastparent_lsa: Lsa },
    SysopEndLogicalUndo,
    TranCommit,
    TranAbort,
    MvccAssign,
    UniqueStatsUndoRedo { btid: u64 },
}

/// `log_append_undoredo` / `log_append_undo` / `log_append_redo` /
/// `log_append_compensate` (spec.md §6).
pub trait LogSink: Send + Sync {
    /// Appends a record and returns the LSA it was written at.
    fn append(&self, tran_index: TranIndex, kind: LogRecordKind, payload: &[u8]) -> Lsa;
}

/// `page_fix` / `page_unfix` / `page_set_dirty` for B-tree root reflection
/// (spec.md §4.6, §6). Keyed by BTID since that's the only root this crate
/// ever needs to touch (unique-index counter reflection).
pub trait PageFixer: Send + Sync {
    /// Reads the authoritative (keys, oids, nulls) triple currently stored
    /// in a B-tree root page, if the root has ever been touched.
    fn read_root_counters(&self, btid: u64) -> Option<(i64, i64, i64)>;

    /// Writes the triple into the B-tree root page and marks it dirty.
    /// Must not be called while the caller holds any latch that would
    /// violate the lock order in spec.md §5 (transaction-table →
    /// MVCC-table → per-BTID mutex → page buffer).
    fn write_root_counters(&self, btid: u64, counters: (i64, i64, i64));
}

/// Lock-manager cleanup hooks the core calls on kill (spec.md §6).
pub trait LockWaiter: Send + Sync {
    /// Forces any lock wait the target transaction is blocked on to wake
    /// up and observe the interrupt.
    fn wake_waiter(&self, tran_index: TranIndex);

    /// Releases all locks held by the transaction (called after abort).
    fn release_all(&self, tran_index: TranIndex);
}

/// Monotonic clock for query deadlines (spec.md §6).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// `is_dba` / client-name comparison for kill authorization (spec.md §6,
/// §4.8; grounded in `logtb_am_i_dba_client` and the login-name compare in
/// `xlogtb_kill_tran_index`, see SPEC_FULL.md).
pub trait Authorizer: Send + Sync {
    fn is_dba(&self, requester: &crate::txn::types::ClientIdentity) -> bool;
}

pub mod fakes {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Records appended records in memory; never persists anything. Good
    /// enough to assert ordering/LSA monotonicity in tests without a real
    /// WAL writer.
    #[derive(Default)]
    pub struct InMemoryLogSink {
        next_offset: AtomicI64,
        pub records: Mutex<Vec<(TranIndex, LogRecordKind)>>,
    }

    impl LogSink for InMemoryLogSink {
        fn append(&self, tran_index: TranIndex, kind: LogRecordKind, _payload: &[u8]) -> Lsa {
            let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
            self.records.lock().push((tran_index, kind));
            Lsa::new(0, offset as i32)
        }
    }

    #[derive(Default)]
    pub struct InMemoryPageFixer {
        roots: Mutex<HashMap<u64, (i64, i64, i64)>>,
    }

    impl PageFixer for InMemoryPageFixer {
        fn read_root_counters(&self, btid: u64) -> Option<(i64, i64, i64)> {
            self.roots.lock().get(&btid).copied()
        }

        fn write_root_counters(&self, btid: u64, counters: (i64, i64, i64)) {
            self.roots.lock().insert(btid, counters);
        }
    }

    #[derive(Default)]
    pub struct NullLockWaiter;

    impl LockWaiter for NullLockWaiter {
        fn wake_waiter(&self, _tran_index: TranIndex) {}
        fn release_all(&self, _tran_index: TranIndex) {}
    }

    /// A clock a test can advance by hand instead of sleeping.
    #[derive(Default)]
    pub struct ManualClock {
        now: AtomicI64,
    }

    impl ManualClock {
        pub fn new(start_ms: i64) -> Self {
            Self { now: AtomicI64::new(start_ms) }
        }

        pub fn advance(&self, ms: i64) {
            self.now.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    /// Lets a test keep an `Arc<ManualClock>` to advance after handing a
    /// boxed clock off to something that owns `Box<dyn Clock>`.
    impl Clock for std::sync::Arc<ManualClock> {
        fn now_ms(&self) -> i64 {
            self.as_ref().now_ms()
        }
    }

    /// Authorizes exactly the identities in the `dba` set.
    pub struct SetAuthorizer {
        pub dba_logins: Vec<String>,
    }

    impl Authorizer for SetAuthorizer {
        fn is_dba(&self, requester: &crate::txn::types::ClientIdentity) -> bool {
            self.dba_logins.iter().any(|l| l == &requester.login_name)
        }
    }
}
