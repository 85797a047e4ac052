//! Metadata blob and the side state machine
//!
//! The metadata records which side currently constitutes the durable
//! snapshot, which side receives new WAL entries, the chunk counts of
//! both, and the transaction id the snapshot was taken at. Writing it is
//! a single host-KV `set`, so every observable metadata state decodes to a
//! consistent database: the active parts plus the active WAL's covered
//! chunks.
//!
//! The blob is small JSON: debuggable from the host side and far below
//! any plausible slot cap; exceeding it is a programmer error, not a
//! runtime condition.

use serde::{Deserialize, Serialize};

/// One of the two symmetric storage sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// Side A
    A,
    /// Side B
    B,
}

impl Side {
    /// The opposite side.
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    /// Single-letter tag used in slot names.
    pub fn tag(self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }
}

/// Per-side chunk counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideCounts {
    /// Chunks on side A.
    pub a: u32,
    /// Chunks on side B.
    pub b: u32,
}

impl SideCounts {
    /// Counter for `side`.
    pub fn get(&self, side: Side) -> u32 {
        match side {
            Side::A => self.a,
            Side::B => self.b,
        }
    }

    /// Set the counter for `side`.
    pub fn set(&mut self, side: Side, count: u32) {
        match side {
            Side::A => self.a = count,
            Side::B => self.b = count,
        }
    }
}

/// The durable description of a database's persistent state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Schema version the stored rows were written under.
    pub schema_version: u32,
    /// Every version the writing build had declared, ascending. Purely
    /// informational for tooling and future migration layers.
    pub known_versions: Vec<u32>,
    /// Side whose parts constitute the durable snapshot.
    pub active_parts: Side,
    /// Side whose WAL chunks apply on top of that snapshot.
    pub active_wal: Side,
    /// Snapshot part counts per side.
    pub parts: SideCounts,
    /// WAL chunk counts per side.
    pub wal: SideCounts,
    /// Largest transaction id that had been handed out when the active
    /// snapshot was taken. Recovery resumes id assignment above it; it is
    /// NOT a replay filter, since a transaction at or below it may commit
    /// onto the new WAL side after the flip.
    pub snapshot_txn: u64,
}

impl Metadata {
    /// Metadata for a never-saved database.
    pub fn fresh(schema_version: u32) -> Self {
        Metadata {
            schema_version,
            known_versions: Vec::new(),
            active_parts: Side::A,
            active_wal: Side::A,
            parts: SideCounts::default(),
            wal: SideCounts::default(),
            snapshot_txn: 0,
        }
    }

    /// Serialize to the JSON blob stored in the meta slot.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("metadata serializes infallibly")
    }

    /// Parse a meta slot's contents.
    pub fn decode(text: &str) -> Result<Metadata, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_other() {
        assert_eq!(Side::A.other(), Side::B);
        assert_eq!(Side::B.other(), Side::A);
        assert_eq!(Side::A.tag(), "A");
    }

    #[test]
    fn test_side_counts() {
        let mut counts = SideCounts::default();
        counts.set(Side::B, 7);
        assert_eq!(counts.get(Side::A), 0);
        assert_eq!(counts.get(Side::B), 7);
    }

    #[test]
    fn test_fresh_metadata() {
        let meta = Metadata::fresh(3);
        assert_eq!(meta.schema_version, 3);
        assert_eq!(meta.active_parts, Side::A);
        assert_eq!(meta.active_wal, Side::A);
        assert_eq!(meta.parts.get(Side::A), 0);
        assert_eq!(meta.snapshot_txn, 0);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let mut meta = Metadata::fresh(1);
        meta.active_parts = Side::B;
        meta.parts.set(Side::B, 4);
        meta.wal.set(Side::B, 2);
        meta.snapshot_txn = 99;
        let text = meta.encode();
        assert_eq!(Metadata::decode(&text).unwrap(), meta);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Metadata::decode("not json").is_err());
        assert!(Metadata::decode("{\"schema_version\":1}").is_err());
    }
}
