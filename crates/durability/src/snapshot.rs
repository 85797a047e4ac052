//! Snapshot stream codec
//!
//! A snapshot is a stream of MessagePack frames: a `TableHeader` naming a
//! table and its row count, followed by that many `RowFrame`s. The byte
//! stream is windowed into CRC/base64 chunks sized to the host slot cap
//! and written to the part slots of one side; frames may span part
//! boundaries. Secondary indices are not stored; they are rebuilt from
//! rows on load.

use crate::chunk;
use crate::metadata::Side;
use crate::slots::part_slot;
use serde::{Deserialize, Serialize};
use tessera_core::{Error, HostKv, Key, Limits, Result, Value};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct TableHeader {
    table: String,
    rows: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RowFrame {
    key: Key,
    object: Value,
}

/// Streams snapshot frames into the part slots of one side.
pub struct SnapshotWriter<'a> {
    kv: &'a dyn HostKv,
    db: &'a str,
    side: Side,
    capacity: usize,
    buf: Vec<u8>,
    parts_written: u32,
}

impl<'a> SnapshotWriter<'a> {
    /// Writer targeting `side`'s part slots.
    pub fn new(kv: &'a dyn HostKv, db: &'a str, side: Side, limits: &Limits) -> Self {
        SnapshotWriter {
            kv,
            db,
            side,
            capacity: chunk::payload_capacity(limits),
            buf: Vec::new(),
            parts_written: 0,
        }
    }

    /// Emit a table header; exactly `rows` row frames must follow.
    pub fn begin_table(&mut self, table: &str, rows: u64) -> Result<()> {
        chunk::write_frame(
            &mut self.buf,
            &TableHeader {
                table: table.to_string(),
                rows,
            },
        )?;
        self.flush_full_parts()
    }

    /// Emit one row.
    pub fn row(&mut self, key: &Key, object: &Value) -> Result<()> {
        chunk::write_frame(
            &mut self.buf,
            &RowFrame {
                key: key.clone(),
                object: object.clone(),
            },
        )?;
        self.flush_full_parts()
    }

    /// Flush the remainder and return the number of parts written.
    pub fn finish(mut self) -> Result<u32> {
        self.flush_full_parts()?;
        if !self.buf.is_empty() {
            let payload = std::mem::take(&mut self.buf);
            self.write_part(&payload)?;
        }
        Ok(self.parts_written)
    }

    fn flush_full_parts(&mut self) -> Result<()> {
        while self.buf.len() >= self.capacity {
            let rest = self.buf.split_off(self.capacity);
            let full = std::mem::replace(&mut self.buf, rest);
            self.write_part(&full)?;
        }
        Ok(())
    }

    fn write_part(&mut self, payload: &[u8]) -> Result<()> {
        let slot = part_slot(self.db, self.side, self.parts_written);
        self.kv.set(&slot, &chunk::encode_chunk(payload))?;
        self.parts_written += 1;
        Ok(())
    }
}

/// Read a whole snapshot side back into per-table row lists.
///
/// Any missing or corrupt part makes the base state unusable; the caller
/// falls back to an empty database with a warning.
pub fn read_snapshot(
    kv: &dyn HostKv,
    db: &str,
    side: Side,
    parts: u32,
) -> Result<Vec<(String, Vec<(Key, Value)>)>> {
    let mut stream = Vec::new();
    for n in 0..parts {
        let slot = part_slot(db, side, n);
        let text = kv
            .get(&slot)
            .ok_or_else(|| Error::Codec(format!("snapshot part {slot} is missing")))?;
        let payload = chunk::decode_chunk(&text).map_err(|e| {
            warn!(slot, error = %e, "corrupt snapshot part");
            Error::Codec(format!("snapshot part {slot}: {e}"))
        })?;
        stream.extend_from_slice(&payload);
    }

    let mut tables = Vec::new();
    let mut cursor = &stream[..];
    while !cursor.is_empty() {
        let header: TableHeader = chunk::read_frame(&mut cursor)?;
        let mut rows = Vec::with_capacity(header.rows as usize);
        for _ in 0..header.rows {
            let frame: RowFrame = chunk::read_frame(&mut cursor)?;
            rows.push((frame.key, frame.object));
        }
        tables.push((header.table, rows));
    }
    Ok(tables)
}

/// Delete part slots `from..to` on one side.
pub fn clear_parts(kv: &dyn HostKv, db: &str, side: Side, from: u32, to: u32) {
    for n in from..to {
        kv.delete(&part_slot(db, side, n));
    }
}
