//! Tunables recognized by the transaction subsystem (spec.md §6).
//!
//! Plain struct with a `Default` impl and named constructors for common
//! profiles, the same shape the rest of the engine configures durability
//! and index-update policy with.

use crate::txn::types::IsolationLevel;
use std::time::Duration;

/// Transaction-subsystem configuration.
#[derive(Debug, Clone)]
pub struct TxnConfig {
    /// Initial transaction-table size and hard ceiling after recovery.
    pub max_clients: i32,

    /// Isolation level assigned to a freshly initialized TDES.
    pub default_isolation: IsolationLevel,

    /// Default lock wait in milliseconds for new TDES; `None` = infinite.
    pub default_lock_wait_ms: Option<u32>,

    /// On shutdown, TDESes with updates commit (true) or abort (false).
    pub commit_on_shutdown: bool,

    /// Sets `disable_modifications` on every new TDES.
    pub read_only_mode: bool,

    /// Diagnostic logging of global unique-stat counter changes.
    pub log_unique_stats: bool,

    /// Extra assertions and stack traces on unexpected server-die paths.
    pub test_mode: bool,

    /// How many times `kill` retries after signaling interrupt before
    /// giving up with a timeout (spec.md §4.8: "bounded, ~10 seconds").
    /// Grounded in CUBRID's `LOGTB_RETRY_SLAM_MAX_TIMES`. Exposed so tests
    /// don't have to sleep the full real-world budget.
    pub kill_retry_attempts: u32,

    /// Interval between kill-retry observations.
    pub kill_retry_interval: Duration,

    /// Growth multiplier applied to the transaction table on expansion.
    pub table_expand_ratio: f32,

    /// Minimum system floor for the transaction table regardless of
    /// `max_clients` (mirrors the source's `system_min`).
    pub system_min_clients: i32,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            max_clients: 100,
            default_isolation: IsolationLevel::ReadCommitted,
            default_lock_wait_ms: None,
            commit_on_shutdown: false,
            read_only_mode: false,
            log_unique_stats: false,
            test_mode: false,
            kill_retry_attempts: 10,
            kill_retry_interval: Duration::from_secs(1),
            table_expand_ratio: 1.25,
            system_min_clients: 10,
        }
    }
}

impl TxnConfig {
    /// A configuration tuned for fast, deterministic unit tests: small
    /// table, immediate kill-retry interval, test-mode assertions on.
    pub fn for_testing() -> Self {
        Self {
            max_clients: 16,
            kill_retry_attempts: 3,
            kill_retry_interval: Duration::from_millis(1),
            test_mode: true,
            ..Default::default()
        }
    }

    /// A read-only configuration: every new TDES starts with modifications
    /// disabled.
    pub fn read_only() -> Self {
        Self {
            read_only_mode: true,
            ..Default::default()
        }
    }

    pub fn initial_table_size(&self) -> i32 {
        self.max_clients.max(self.system_min_clients)
    }
}
