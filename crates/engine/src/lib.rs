//! Database engine for Tessera
//!
//! Ties the layers together behind two surfaces:
//!
//! - [`DatabaseBuilder`]: declare schema versions, then `build()`; the
//!   schema freezes, persisted state is recovered, and a background saver
//!   starts.
//! - [`Database`]: run multi-statement transactions with automatic
//!   commit/abort and write-conflict retry, or use the auto-commit
//!   [`Table`] proxy where each call is its own transaction.
//!
//! All interior mutation happens under one mutex, preserving the MVCC
//! engine's assumption that nothing observes a row map and its secondary
//! indices between their paired updates. The saver snapshots with O(1)
//! map clones and writes parts outside the lock, so commits proceed while
//! a save is in flight.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod background;
pub mod builder;
pub mod database;
pub mod proxy;

pub use builder::DatabaseBuilder;
pub use database::Database;
pub use proxy::{AutoQuery, AutoSelection, Query, Selection, Table, Txn, TxnTable};
