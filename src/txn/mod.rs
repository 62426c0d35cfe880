//! The transaction subsystem: transaction descriptors, MVCC, nested system
//! operations, unique-index statistics, and cooperative interruption.

pub mod collab;
pub mod count_opt;
pub mod engine;
pub mod ids;
pub mod interrupt;
pub mod introspect;
pub mod mvcc;
pub mod sysop;
pub mod table;
pub mod tdes;
pub mod twophase;
pub mod types;
pub mod unique_stats;

pub use engine::TxnEngine;
pub use tdes::Tdes;
pub use types::{
    ClientIdentity, IsolationLevel, Lsa, TranIndex, TransactionKind, TransactionState, Trid,
};
