//! Host-KV slot naming
//!
//! All persistence for a database named `<db>` lives under three families:
//! `database.<db>.meta`, `database.<db>.part.<side>.<n>` and
//! `database.<db>.wal.<side>.<n>`.

use crate::metadata::Side;

/// The metadata slot.
pub fn meta_slot(db: &str) -> String {
    format!("database.{db}.meta")
}

/// Snapshot part `n` on `side`.
pub fn part_slot(db: &str, side: Side, n: u32) -> String {
    format!("database.{db}.part.{}.{n}", side.tag())
}

/// WAL chunk `n` on `side`.
pub fn wal_slot(db: &str, side: Side, n: u32) -> String {
    format!("database.{db}.wal.{}.{n}", side.tag())
}
