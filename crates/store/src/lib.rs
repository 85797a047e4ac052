//! MVCC table engine and transaction manager for Tessera
//!
//! Rows are version chains keyed by primary key in a persistent ordered
//! map; secondary indices map indexed keys to primary-key sets. Writers
//! lock row heads via the version's `writer` field; readers stamp
//! `last_reader`; conflicts surface as typed errors that the engine's
//! retry loop converts into re-execution.
//!
//! Visibility rule (the single source of truth): a transaction `t` sees
//! the newest version `v` of a row with `v.begin <= t < v.end` whose
//! writer is absent or `t` itself.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod matcher;
pub mod table;
pub mod transaction;
pub mod version;

pub use manager::{GcBatch, TransactionManager};
pub use matcher::Matcher;
pub use table::{TableSnapshot, TableStore};
pub use transaction::{Transaction, TxnState};
pub use version::{RowVersion, TxnId, VersionChain, NEVER};
