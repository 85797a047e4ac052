//! Write-ahead log entries and chunk layout
//!
//! A WAL entry is the committed effect of one transaction: a batch of
//! `(table, primary key, post-image)` mutations, where an absent image is
//! a tombstone. A WAL chunk is a concatenation of MessagePack entry
//! frames, self-delimiting so a reader consumes entries until the chunk
//! is exhausted, wrapped in the CRC/base64 chunk codec.

use crate::chunk::{self, ChunkError};
use crate::metadata::Side;
use crate::slots::wal_slot;
use serde::{Deserialize, Serialize};
use tessera_core::{HostKv, Key, Result, Value};
use tracing::warn;

/// One mutation within a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalMutation {
    /// Table the row belongs to.
    pub table: String,
    /// Primary key of the mutated row.
    pub key: Key,
    /// Post-image, or `None` for a delete.
    pub object: Option<Value>,
}

/// The committed effect of one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Committing transaction's id.
    pub txn: u64,
    /// Final per-row images, one per touched primary key.
    pub mutations: Vec<WalMutation>,
}

/// Serialize entries into one chunk payload.
pub fn encode_entries(entries: &[WalEntry]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for entry in entries {
        chunk::write_frame(&mut buf, entry)?;
    }
    Ok(buf)
}

/// Decode all entries of one chunk payload.
///
/// A good checksum makes trailing garbage unexpected; if it happens anyway
/// the tail is dropped with a warning and the entries read so far survive.
pub fn decode_entries(payload: &[u8]) -> Vec<WalEntry> {
    let mut entries = Vec::new();
    let mut cursor = payload;
    while !cursor.is_empty() {
        match chunk::read_frame::<WalEntry>(&mut cursor) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(error = %e, "undecodable tail in WAL chunk, dropping it");
                break;
            }
        }
    }
    entries
}

/// Read every entry of a WAL side, in chunk order.
///
/// A chunk that fails its checksum is skipped with a warning; recovery
/// continues with the next chunk. Absent chunks below the recorded count
/// are treated the same way.
pub fn read_side(kv: &dyn HostKv, db: &str, side: Side, count: u32) -> Vec<WalEntry> {
    let mut entries = Vec::new();
    for n in 0..count {
        let slot = wal_slot(db, side, n);
        let Some(text) = kv.get(&slot) else {
            warn!(slot, "WAL chunk missing, skipping");
            continue;
        };
        match chunk::decode_chunk(&text) {
            Ok(payload) => entries.extend(decode_entries(&payload)),
            Err(e @ ChunkError::BadChecksum { .. })
            | Err(e @ ChunkError::BadEncoding(_))
            | Err(e @ ChunkError::TooShort(_)) => {
                warn!(slot, error = %e, "corrupt WAL chunk, skipping");
            }
        }
    }
    entries
}

/// Delete chunks `0..count` of a WAL side.
pub fn clear_side(kv: &dyn HostKv, db: &str, side: Side, count: u32) {
    for n in 0..count {
        kv.delete(&wal_slot(db, side, n));
    }
}
