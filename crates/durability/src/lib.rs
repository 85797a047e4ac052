//! Durability layer for Tessera
//!
//! Persists the in-memory database into the host's string-slot store using
//! a double-buffered layout: two symmetric sides (A and B) exist for both
//! snapshot parts and the write-ahead log. At all times exactly one side of
//! each is active; the other is scratch. Every transition that must be
//! atomic maps onto a single host-KV `set`; in particular the metadata
//! write that flips sides is the commit point of a save.
//!
//! Chunks (WAL chunks and snapshot parts) are CRC-framed MessagePack
//! wrapped in base64 so they fit the host's character-string slots.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod manager;
pub mod metadata;
pub mod slots;
pub mod snapshot;
pub mod testing;
pub mod wal;

pub use manager::{DurabilityManager, LoadOutcome, RecoveredState, SaveJob};
pub use metadata::{Metadata, Side, SideCounts};
pub use snapshot::SnapshotWriter;
pub use wal::{WalEntry, WalMutation};
