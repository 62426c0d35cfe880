//! C10: read-only introspection of the transaction table (spec.md §4.10).
//!
//! Grounded in `logtb_dump_trantable` / `logtb_get_client_ids` in
//! `examples/original_source/src/transaction/log_tran_table.c`: a snapshot
//! is taken once under the table's read lock and handed back as plain data,
//! so the caller (a `show transaction status` style statement, an admin
//! tool) never holds the lock while formatting or printing it.

use crate::txn::sysop;
use crate::txn::table::TranTable;
use crate::txn::tdes::LsaMarkers;
use crate::txn::types::{
    AbortReason, ClientIdentity, IsolationLevel, TranIndex, TransactionKind, TransactionState, Trid, WaitMsecs,
};

/// One row of `logtb_dump_trantable`-style output: everything an admin
/// `show transaction status` statement needs, frozen at the moment the
/// table's read lock was held (spec.md §4.10). Fields opaque to this crate
/// (XASL id, replication bookkeeping counts) are out of scope — see
/// spec.md §3 — and are not reproduced here.
#[derive(Debug, Clone)]
pub struct TdesSnapshotRow {
    pub index: TranIndex,
    pub trid: Trid,
    pub kind: TransactionKind,
    pub state: TransactionState,
    pub isolation: IsolationLevel,
    pub wait_msecs: WaitMsecs,
    pub lsas: LsaMarkers,
    pub client: ClientIdentity,
    pub is_loose_end: bool,
    pub is_interrupted: bool,
    pub abort_reason: AbortReason,
    pub open_sysop_depth: usize,
    pub query_start_ms: i64,
    pub query_timeout_ms: i64,
    pub tran_start_ms: i64,
}

/// Takes a one-shot snapshot of every occupied transaction-table slot.
pub fn snapshot_table(table: &TranTable) -> Vec<TdesSnapshotRow> {
    let mut rows = Vec::new();
    table.map_active(|tdes| {
        rows.push(TdesSnapshotRow {
            index: tdes.index,
            trid: tdes.trid(),
            kind: tdes.kind,
            state: tdes.state(),
            isolation: tdes.isolation(),
            wait_msecs: tdes.wait_msecs(),
            lsas: *tdes.lsas.read(),
            client: tdes.client.read().clone(),
            is_loose_end: tdes.is_loose_end(),
            is_interrupted: tdes.is_interrupted(),
            abort_reason: tdes.abort_reason(),
            open_sysop_depth: sysop::depth(tdes),
            query_start_ms: tdes.query_start_ms(),
            query_timeout_ms: tdes.query_timeout_ms(),
            tran_start_ms: tdes.tran_start_ms(),
        });
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TxnConfig;
    use crate::txn::ids::IdAllocator;
    use std::sync::Arc;

    #[test]
    fn snapshot_includes_the_system_transaction_and_every_worker() {
        let table = TranTable::new(Arc::new(IdAllocator::new()), TxnConfig::for_testing());
        table
            .assign_index(None, TransactionKind::Worker, ClientIdentity::default())
            .unwrap();
        let rows = snapshot_table(&table);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.kind == TransactionKind::SystemMain));
        assert!(rows.iter().any(|r| r.kind == TransactionKind::Worker));
    }

    #[test]
    fn snapshot_row_reflects_lsas_and_the_interrupt_bit() {
        let table = TranTable::new(Arc::new(IdAllocator::new()), TxnConfig::for_testing());
        let idx = table
            .assign_index(None, TransactionKind::Worker, ClientIdentity::default())
            .unwrap();
        let tdes = table.get(idx).unwrap();
        tdes.record_lsa(crate::txn::types::Lsa::new(1, 5));
        tdes.set_interrupted(true);
        tdes.set_query_deadline(10, 100);

        let row = snapshot_table(&table).into_iter().find(|r| r.index == idx).unwrap();
        assert_eq!(row.lsas.tail_lsa, crate::txn::types::Lsa::new(1, 5));
        assert!(row.is_interrupted);
        assert_eq!(row.query_start_ms, 10);
        assert_eq!(row.query_timeout_ms, 110);
    }
}
