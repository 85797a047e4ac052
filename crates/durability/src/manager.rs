//! Durability manager: commit path, save path, recovery
//!
//! The crash-safety argument, in full:
//!
//! - Commit path: append the transaction's WAL entry to the tail chunk of
//!   the current WAL side. An in-place rewrite of the tail chunk is one
//!   atomic `set`; opening a fresh chunk writes the chunk first and then
//!   the metadata whose count covers it; a crash in between leaves an
//!   inert chunk the counts do not reach.
//! - Save path: (a) flip the in-memory WAL append side so new commits land
//!   on the scratch side, without persisting metadata; (b) write the
//!   snapshot into the scratch parts side; (c) atomically write metadata
//!   flipping both active sides and recording the snapshot's transaction
//!   id; (d) delete the retired WAL chunks, then the retired parts.
//!   Crashes anywhere before (c) leave the old sides authoritative;
//!   crashes after (c) leave inert slots that (d) or a later save clears.
//! - Recovery: absent or unreadable metadata means an empty database.
//!   Otherwise the active parts are the base state and the whole active
//!   WAL replays on top in commit order; full post-images make any
//!   already-folded entries converge instead of corrupting.
//!
//! Metadata persisted by the commit path keeps the *durable* active-side
//! flags even while a save is in flight: only the chunk counters move.
//! The flags flip in exactly one place, step (c).

use crate::chunk;
use crate::metadata::{Metadata, Side};
use crate::slots::meta_slot;
use crate::snapshot::{self, SnapshotWriter};
use crate::wal::{self, WalEntry};
use std::sync::Arc;
use tessera_core::{HostKv, Key, Limits, Result, Value};
use tracing::{debug, info, warn};

/// What `open` found in the host KV.
#[derive(Debug)]
pub enum LoadOutcome {
    /// No usable prior state; start empty.
    Fresh,
    /// A snapshot (and possibly WAL) to rebuild from.
    Recovered(RecoveredState),
}

/// Recovered base state plus the WAL tail to replay on top of it.
#[derive(Debug)]
pub struct RecoveredState {
    /// Schema version the stored data was written under.
    pub schema_version: u32,
    /// Base rows per table, from the active snapshot side.
    pub tables: Vec<(String, Vec<(Key, Value)>)>,
    /// Every entry of the active WAL side, in commit order. Entries whose
    /// effects the snapshot already holds reapply identical post-images.
    pub wal: Vec<WalEntry>,
    /// First transaction id safe to hand out after recovery.
    pub next_txn: u64,
}

/// Book-keeping captured when a save begins; consumed when it commits.
#[derive(Debug, Clone, Copy)]
struct SaveTicket {
    target_parts: Side,
    retired_wal: Side,
    retired_wal_count: u32,
    retired_parts: Side,
    retired_parts_count: u32,
    stale_target_parts: u32,
    snapshot_txn: u64,
}

/// A save in flight. Created under the database lock, used to write the
/// snapshot outside it, then handed back to commit the flip.
pub struct SaveJob {
    kv: Arc<dyn HostKv>,
    db: String,
    limits: Limits,
    ticket: SaveTicket,
}

impl SaveJob {
    /// Writer for the scratch parts side. Runs outside the database lock;
    /// commits proceed concurrently on the flipped WAL side.
    pub fn snapshot_writer(&self) -> SnapshotWriter<'_> {
        SnapshotWriter::new(&*self.kv, &self.db, self.ticket.target_parts, &self.limits)
    }

    /// Step (d): clear the retired WAL, the retired parts, and any stale
    /// parts above the fresh count on the target side. Crashing anywhere
    /// in here merely leaves inert slots.
    pub fn cleanup(&self, part_count: u32) {
        wal::clear_side(
            &*self.kv,
            &self.db,
            self.ticket.retired_wal,
            self.ticket.retired_wal_count,
        );
        snapshot::clear_parts(
            &*self.kv,
            &self.db,
            self.ticket.retired_parts,
            0,
            self.ticket.retired_parts_count,
        );
        if self.ticket.stale_target_parts > part_count {
            snapshot::clear_parts(
                &*self.kv,
                &self.db,
                self.ticket.target_parts,
                part_count,
                self.ticket.stale_target_parts,
            );
        }
    }
}

/// Owns the metadata state machine for one database.
pub struct DurabilityManager {
    kv: Arc<dyn HostKv>,
    db: String,
    limits: Limits,
    /// Durable view: the active-side flags here are only ever what a crash
    /// may safely observe.
    meta: Metadata,
    /// Side new WAL entries append to; diverges from `meta.active_wal`
    /// while a save is in flight.
    wal_side: Side,
}

impl DurabilityManager {
    /// Open a database's persistent state.
    ///
    /// Absent metadata is a fresh database. Unreadable metadata or an
    /// unreadable snapshot reinitializes empty with a warning; a corrupt
    /// WAL chunk only loses the transactions in that chunk.
    pub fn open(kv: Arc<dyn HostKv>, db: impl Into<String>, limits: Limits) -> (Self, LoadOutcome) {
        let db = db.into();
        let slot = meta_slot(&db);

        let meta = match kv.get(&slot) {
            None => {
                debug!(db, "no metadata; starting empty");
                return (Self::fresh(kv, db, limits), LoadOutcome::Fresh);
            }
            Some(text) => match Metadata::decode(&text) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(db, error = %e, "unreadable metadata; reinitializing empty");
                    return (Self::fresh(kv, db, limits), LoadOutcome::Fresh);
                }
            },
        };

        let parts_side = meta.active_parts;
        let tables = match snapshot::read_snapshot(&*kv, &db, parts_side, meta.parts.get(parts_side))
        {
            Ok(tables) => tables,
            Err(e) => {
                warn!(db, error = %e, "unreadable snapshot; reinitializing empty");
                return (Self::fresh(kv, db, limits), LoadOutcome::Fresh);
            }
        };

        // Replay everything on the active side, in commit order. Entries
        // whose effects are already folded into the snapshot (survivors of
        // an earlier failed save) reapply the same post-images and
        // converge; filtering by id instead would drop the entry of an
        // older transaction that committed after the flip.
        let wal_side = meta.active_wal;
        let replay = wal::read_side(&*kv, &db, wal_side, meta.wal.get(wal_side));

        let max_walked = replay.iter().map(|e| e.txn).max().unwrap_or(0);
        let next_txn = meta.snapshot_txn.max(max_walked) + 1;

        info!(
            db,
            schema_version = meta.schema_version,
            tables = tables.len(),
            wal_entries = replay.len(),
            "recovered persistent state"
        );

        let state = RecoveredState {
            schema_version: meta.schema_version,
            tables,
            wal: replay,
            next_txn,
        };
        let manager = DurabilityManager {
            kv,
            db,
            limits,
            wal_side,
            meta,
        };
        (manager, LoadOutcome::Recovered(state))
    }

    fn fresh(kv: Arc<dyn HostKv>, db: String, limits: Limits) -> Self {
        let meta = Metadata::fresh(0);
        DurabilityManager {
            kv,
            db,
            limits,
            wal_side: meta.active_wal,
            meta,
        }
    }

    /// Record the schema version new data is written under, plus every
    /// version this build declares. Nothing is materialized in the host KV
    /// until the first commit or save.
    pub fn set_schema_versions(&mut self, active: u32, known: Vec<u32>) {
        self.meta.schema_version = active;
        self.meta.known_versions = known;
    }

    /// Database name.
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Size limits in effect.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Current durable-view metadata (tests and diagnostics).
    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    // === Commit path ===

    /// Append one committed transaction to the WAL.
    ///
    /// Preference order: rewrite the tail chunk in place when the entry
    /// fits (one atomic `set`, no metadata write); otherwise open a fresh
    /// chunk and then bump the covering count in metadata. An entry too
    /// large for an empty chunk is dropped with a warning: the commit
    /// stands, and only its crash-recovery is lost until the next save.
    pub fn append_commit(&mut self, entry: &WalEntry) -> Result<()> {
        let side = self.wal_side;
        let count = self.meta.wal.get(side);
        let capacity = chunk::payload_capacity(&self.limits);

        if count > 0 {
            let tail_slot = crate::slots::wal_slot(&self.db, side, count - 1);
            if let Some(text) = self.kv.get(&tail_slot) {
                if let Ok(existing) = chunk::decode_chunk(&text) {
                    let mut extended = wal::decode_entries(&existing);
                    extended.push(entry.clone());
                    let payload = wal::encode_entries(&extended)?;
                    if payload.len() <= capacity {
                        self.kv.set(&tail_slot, &chunk::encode_chunk(&payload))?;
                        return Ok(());
                    }
                }
            }
        }

        let payload = wal::encode_entries(std::slice::from_ref(entry))?;
        if payload.len() > capacity {
            warn!(
                db = %self.db,
                txn = entry.txn,
                bytes = payload.len(),
                "transaction too large for a WAL chunk; it will not survive \
                 a crash until the next snapshot"
            );
            return Ok(());
        }
        let slot = crate::slots::wal_slot(&self.db, side, count);
        self.kv.set(&slot, &chunk::encode_chunk(&payload))?;
        self.meta.wal.set(side, count + 1);
        self.persist_meta()
    }

    // === Save path ===

    /// Step (a): start a save of the state as of `snapshot_txn`.
    ///
    /// Flips the in-memory WAL append side; metadata on the host still
    /// names the old sides until [`DurabilityManager::commit_save`]. If an
    /// earlier save failed after flipping, the side stays flipped and its
    /// accumulated entries simply remain covered by the next flip.
    pub fn begin_save(&mut self, snapshot_txn: u64) -> SaveJob {
        let ticket = SaveTicket {
            target_parts: self.meta.active_parts.other(),
            retired_wal: self.meta.active_wal,
            retired_wal_count: self.meta.wal.get(self.meta.active_wal),
            retired_parts: self.meta.active_parts,
            retired_parts_count: self.meta.parts.get(self.meta.active_parts),
            stale_target_parts: self.meta.parts.get(self.meta.active_parts.other()),
            snapshot_txn,
        };
        if self.wal_side == self.meta.active_wal {
            self.wal_side = self.wal_side.other();
            self.meta.wal.set(self.wal_side, 0);
        }
        debug!(
            db = %self.db,
            snapshot_txn,
            target = ticket.target_parts.tag(),
            "save started"
        );
        SaveJob {
            kv: Arc::clone(&self.kv),
            db: self.db.clone(),
            limits: self.limits,
            ticket,
        }
    }

    /// Step (c): the atomic flip. After this write the new snapshot plus
    /// the new WAL side are the durable truth.
    pub fn commit_save(&mut self, job: &SaveJob, part_count: u32) -> Result<()> {
        let ticket = job.ticket;
        self.meta.active_parts = ticket.target_parts;
        self.meta.parts.set(ticket.target_parts, part_count);
        self.meta.active_wal = self.wal_side;
        self.meta.snapshot_txn = ticket.snapshot_txn;
        // Retired counters are scratch from here on.
        self.meta.parts.set(ticket.retired_parts, 0);
        if ticket.retired_wal != self.wal_side {
            self.meta.wal.set(ticket.retired_wal, 0);
        }
        self.persist_meta()?;
        info!(
            db = %self.db,
            parts = part_count,
            snapshot_txn = ticket.snapshot_txn,
            side = ticket.target_parts.tag(),
            "snapshot saved"
        );
        Ok(())
    }

    fn persist_meta(&self) -> Result<()> {
        self.kv.set(&meta_slot(&self.db), &self.meta.encode())?;
        Ok(())
    }
}
