//! Shared identifiers and small value types used across the transaction
//! subsystem: TRIDs, MVCCIDs, transaction indices, LSAs, isolation levels,
//! transaction states, and client identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier. Assigned per transaction, wraps on overflow back
/// to [`FIRST_USER_TRID`]. Identifies a transaction in the log, independent
/// of its MVCCID.
pub type Trid = i32;

/// Reserved TRID for the engine's own bookkeeping transaction.
pub const LOG_SYSTEM_TRANID: Trid = 0;

/// First TRID available to ordinary user transactions. `new_trid` never
/// hands out a value below this.
pub const FIRST_USER_TRID: Trid = LOG_SYSTEM_TRANID + 1;

/// Sentinel meaning "no transaction assigned". Distinct from
/// [`LOG_SYSTEM_TRANID`] and [`FIRST_USER_TRID`] so a free slot's trid can
/// never be mistaken for a live one (spec.md §3, §8 invariant 7).
pub const NULL_TRANID: Trid = -1;

/// Transaction index: a dense small integer into the transaction table.
pub type TranIndex = i32;

/// Reserved index for the engine's own bookkeeping transaction.
pub const LOG_SYSTEM_TRAN_INDEX: TranIndex = 0;

/// Sentinel meaning "no index assigned" / "slot is free".
pub const NULL_TRAN_INDEX: TranIndex = -1;

/// MVCC identifier. 64-bit, monotonically allocated. `0` means "null / not
/// assigned yet". Ordering is total; visibility is decided against
/// snapshots, never by comparing MVCCIDs directly to "now".
pub type Mvccid = u64;

/// Sentinel for "no MVCCID assigned".
pub const MVCCID_NULL: Mvccid = 0;

/// First MVCCID an allocator ever hands out.
pub const MVCCID_FIRST: Mvccid = 1;

/// Log sequence address: (pageid, offset) pair identifying a log record.
/// The null LSA (`pageid == -1`) is the sentinel for "no record yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsa {
    pub pageid: i64,
    pub offset: i32,
}

impl Lsa {
    pub const NULL: Lsa = Lsa { pageid: -1, offset: -1 };

    pub fn new(pageid: i64, offset: i32) -> Self {
        Self { pageid, offset }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Default for Lsa {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Lsa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "LSA(null)")
        } else {
            write!(f, "LSA({}|{})", self.pageid, self.offset)
        }
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::ReadCommitted
    }
}

/// Lock wait policy in milliseconds. `Infinite` waits forever, `NoWait`
/// fails immediately on conflict, `Millis(n)` waits up to `n` ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitMsecs {
    Infinite,
    NoWait,
    Millis(u32),
}

impl WaitMsecs {
    /// Matches the source encoding: -1 = infinite, 0 = no-wait, n>0 = millis.
    pub fn as_raw(&self) -> i32 {
        match self {
            WaitMsecs::Infinite => -1,
            WaitMsecs::NoWait => 0,
            WaitMsecs::Millis(n) => *n as i32,
        }
    }

    pub fn from_raw(raw: i32) -> Self {
        match raw {
            i32::MIN..=-1 => WaitMsecs::Infinite,
            0 => WaitMsecs::NoWait,
            n => WaitMsecs::Millis(n as u32),
        }
    }
}

impl Default for WaitMsecs {
    fn default() -> Self {
        WaitMsecs::Infinite
    }
}

/// Transaction state machine (spec.md §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
    UnilaterallyAborted,
    TwoPcPrepared,
    TwoPcCollectingVotes,
    TwoPcSecondPhase,
    Unknown,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TransactionState::Active
                | TransactionState::TwoPcPrepared
                | TransactionState::TwoPcCollectingVotes
                | TransactionState::TwoPcSecondPhase
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted | TransactionState::UnilaterallyAborted
        )
    }
}

/// Why a transaction was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    Normal,
    Deadlock,
    RollbackOnEscalation,
}

impl Default for AbortReason {
    fn default() -> Self {
        AbortReason::Normal
    }
}

/// The kind of worker a TDES belongs to (spec.md §9: "Dynamic dispatch").
/// A plain tagged variant rather than trait-object polymorphism, since the
/// set of kinds is closed and the differences are a handful of predicate
/// checks (e.g. a system-worker's sysop clears head/tail LSAs on sysop-end;
/// `SystemMain` can never be interrupted or killed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// An ordinary client transaction.
    Worker,
    /// An internal engine worker transaction (e.g. vacuum, background flush).
    SystemWorker,
    /// The single reserved bookkeeping transaction at `LOG_SYSTEM_TRAN_INDEX`.
    SystemMain,
}

impl TransactionKind {
    pub fn is_system(&self) -> bool {
        matches!(self, TransactionKind::SystemWorker | TransactionKind::SystemMain)
    }

    /// System-main can never be interrupted or killed (spec.md §4.8).
    pub fn is_killable(&self) -> bool {
        !matches!(self, TransactionKind::SystemMain)
    }
}

/// Client identity, carried for the life of a session (spec.md §4.4, §4.10).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientIdentity {
    pub program_name: String,
    pub user_name: String,
    pub host_name: String,
    pub login_name: String,
    pub process_id: i32,
    pub client_kind: i32,
    pub connection_id: i32,
}

impl ClientIdentity {
    /// The synthetic identity system transactions carry.
    pub fn system() -> Self {
        ClientIdentity {
            program_name: "system".to_string(),
            user_name: "dba".to_string(),
            host_name: "localhost".to_string(),
            login_name: "dba".to_string(),
            process_id: 0,
            client_kind: 0,
            connection_id: 0,
        }
    }
}
