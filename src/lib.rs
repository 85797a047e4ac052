//! Tessera: an embedded, in-memory relational store
//!
//! Tessera provides ACID transactions with snapshot isolation over a
//! deliberately tiny external surface: a host key/value store whose values
//! are size-limited character strings and whose individual writes are
//! atomic but do not compose. Durability comes from a double-buffered
//! snapshot of string "parts" plus a write-ahead log for the commits in
//! between.
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use tesseradb::{DatabaseBuilder, Key, MemoryKv, Value};
//!
//! # fn main() -> tesseradb::Result<()> {
//! let db = DatabaseBuilder::new("game", Arc::new(MemoryKv::new()))
//!     .version(1, [("players", "++id, name, &email")])?
//!     .build()?;
//!
//! let id = db.transaction(|txn| {
//!     let players = txn.table("players")?;
//!     players.add(Value::record([
//!         ("name", "ada".into()),
//!         ("email", "ada@example.net".into()),
//!     ]))
//! })?;
//!
//! let players = db.table("players")?;
//! assert!(players.get(&id)?.is_some());
//! assert_eq!(players.by("email")?.equals("ada@example.net").count()?, 1);
//! # Ok(())
//! # }
//! ```

pub use tessera_core::{
    Error, HostKv, Key, KeyRange, Limits, MemoryKv, Result, SchemaError, SlotError, Value,
};
pub use tessera_engine::{
    AutoQuery, AutoSelection, Database, DatabaseBuilder, Query, Selection, Table, Txn, TxnTable,
};
