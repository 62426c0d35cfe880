//! Error taxonomy for the transaction subsystem (spec.md §7).

use crate::txn::types::TranIndex;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TxnError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    /// Table expansion or chunked-list growth could not allocate.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Post-recovery ceiling reached; expansion refused.
    #[error("too many clients: ceiling of {0} reached")]
    TooManyClients(i32),

    /// Cooperative cancellation observed at a check point.
    #[error("transaction interrupted")]
    Interrupted,

    /// Kill or query-cancel requester lacks authorization.
    #[error("kill not allowed for tran_index {0}")]
    KillNotAllowed(TranIndex),

    /// Kill target does not exist.
    #[error("unknown transaction index {0}")]
    KillUnknownTransaction(TranIndex),

    /// Kill target's client identity does not match the request.
    #[error("kill does not match: tran_index {0}")]
    KillDoesNotMatch(TranIndex),

    /// Kill request was signaled but never observed within the retry budget.
    #[error("kill timed out waiting for tran_index {0} to stop")]
    KillTimeout(TranIndex),

    /// Illegal isolation level reset.
    #[error("invalid isolation level")]
    InvalidIsolationLevel,

    /// A referenced tran_index has no assigned TDES. In the original engine
    /// this goes to a fatal path (log + flush + exit); this crate returns it
    /// instead so the embedding host decides how to fail.
    #[error("invariant violation: unknown tran_index {0}")]
    UnknownTranIndex(TranIndex),

    /// A sysop operation was attempted with an empty top-op stack.
    #[error("no active system operation for tran_index {0}")]
    NoActiveSysop(TranIndex),

    /// A transaction is not in a state that admits the requested operation.
    #[error("transaction {0} is not active")]
    NotActive(TranIndex),

    /// Attempted to kill or interrupt the reserved system transaction.
    #[error("cannot kill or interrupt the system transaction")]
    SystemTransactionNotKillable,

    /// Savepoint name was not found on the addressed transaction.
    #[error("savepoint '{0}' not found on tran_index {1}")]
    UnknownSavepoint(String, TranIndex),
}
