//! The database facade
//!
//! Owns the table stores, the transaction manager and the durability
//! manager under a single mutex, plus the background saver. Commit and
//! abort implement the transaction end protocol: settle or revoke every
//! staged version, append the WAL entry, and run garbage collection when
//! the ending transaction has no older peer still active.

use crate::background::{spawn_saver, SaverSignal};
use crate::proxy::{Table, Txn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use tessera_core::{Error, Result};
use tessera_durability::{DurabilityManager, WalEntry, WalMutation};
use tessera_store::{GcBatch, TableSnapshot, TableStore, TransactionManager, TxnId};
use tracing::{debug, warn};

pub(crate) struct State {
    pub(crate) tables: Vec<TableStore>,
    pub(crate) by_name: BTreeMap<String, usize>,
    pub(crate) txns: TransactionManager,
    pub(crate) durability: DurabilityManager,
}

impl State {
    pub(crate) fn table_index(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }
}

pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) state: Mutex<State>,
    pub(crate) saver: SaverSignal,
    /// Single-flight latch: at most one save runs at a time.
    pub(crate) save_serial: Mutex<()>,
    /// Whether commits schedule background saves.
    pub(crate) auto_save: bool,
}

/// An open Tessera database.
pub struct Database {
    pub(crate) shared: Arc<Shared>,
    saver_thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub(crate) fn start(shared: Arc<Shared>) -> Database {
        let handle = spawn_saver(Arc::clone(&shared));
        Database {
            shared,
            saver_thread: Mutex::new(Some(handle)),
        }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Names of the declared tables, in order.
    pub fn table_names(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        state.tables.iter().map(|t| t.id().to_string()).collect()
    }

    /// Run `body` in a transaction with automatic commit, abort and
    /// write-conflict retry.
    ///
    /// A body that fails with a write conflict is aborted and re-run with
    /// a fresh transaction id; retry is unbounded, so side effects inside
    /// the body must be idempotent. Any other error aborts and propagates.
    pub fn transaction<T>(&self, body: impl Fn(&Txn<'_>) -> Result<T>) -> Result<T> {
        loop {
            let id = self.shared.state.lock().txns.begin();
            let txn = Txn::new(self, id);
            match body(&txn) {
                Ok(value) => {
                    self.commit(id)?;
                    return Ok(value);
                }
                Err(e) if e.is_conflict() => {
                    self.abort(id)?;
                    debug!(db = %self.shared.name, txn = id, "write conflict, retrying");
                }
                Err(e) => {
                    self.abort(id)?;
                    return Err(e);
                }
            }
        }
    }

    /// Auto-commit proxy for one table: each call runs its own
    /// transaction through the same retry loop as [`Database::transaction`].
    pub fn table(&self, name: &str) -> Result<Table<'_>> {
        {
            let state = self.shared.state.lock();
            state.table_index(name)?;
        }
        Ok(Table::new(self, name.to_string()))
    }

    /// Write a snapshot now and wait for it. Also serves as the final
    /// compaction before shutdown.
    pub fn flush(&self) -> Result<()> {
        self.shared.saver.clear_dirty();
        save_once(&self.shared)
    }

    /// Stop the background saver and write a final snapshot.
    pub fn close(&self) -> Result<()> {
        self.stop_saver();
        self.flush()
    }

    fn stop_saver(&self) {
        self.shared.saver.shutdown();
        if let Some(handle) = self.saver_thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub(crate) fn commit(&self, id: TxnId) -> Result<()> {
        let wrote = {
            let mut state = self.shared.state.lock();
            let state = &mut *state;

            let txn = state.txns.get_mut(id)?;
            txn.mark_committing()?;
            let writes = txn.writes().clone();

            for (table_name, images) in &writes {
                let idx = state.table_index(table_name)?;
                for (key, _) in images.iter() {
                    state.tables[idx].settle(id, key);
                }
            }
            state.txns.get_mut(id)?.mark_committed()?;

            let wrote = writes.values().any(|images| !images.is_empty());
            if wrote {
                let mutations: Vec<WalMutation> = writes
                    .iter()
                    .flat_map(|(table, images)| {
                        images.iter().map(|(key, object)| WalMutation {
                            table: table.clone(),
                            key: key.clone(),
                            object: object.clone(),
                        })
                    })
                    .collect();
                let entry = WalEntry { txn: id, mutations };
                if let Err(e) = state.durability.append_commit(&entry) {
                    // The in-memory commit stands; only crash recovery of
                    // this transaction is at risk until the next save.
                    warn!(db = %self.shared.name, txn = id, error = %e, "WAL append failed");
                }
            }

            if let Some(batch) = state.txns.finish(id)? {
                apply_gc(state, &batch);
            }
            debug!(db = %self.shared.name, txn = id, "committed");
            wrote
        };
        if wrote && self.shared.auto_save {
            self.shared.saver.request_save();
        }
        Ok(())
    }

    pub(crate) fn abort(&self, id: TxnId) -> Result<()> {
        let mut state = self.shared.state.lock();
        let state = &mut *state;

        let txn = state.txns.get_mut(id)?;
        txn.mark_aborted()?;
        let touched = txn.touched_keys();
        for (table_name, keys) in &touched {
            let idx = state.table_index(table_name)?;
            for key in keys {
                state.tables[idx].revoke(id, key);
            }
        }
        if let Some(batch) = state.txns.finish(id)? {
            apply_gc(state, &batch);
        }
        debug!(db = %self.shared.name, txn = id, "aborted");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Committed state is already in the WAL; the final snapshot is an
        // optimization callers opt into via close().
        self.stop_saver();
    }
}

fn apply_gc(state: &mut State, batch: &GcBatch) {
    for (table_name, keys) in &batch.tables {
        if let Ok(idx) = state.table_index(table_name) {
            state.tables[idx].gc(batch.horizon, keys);
        }
    }
}

/// One complete save: snapshot under the lock, write parts outside it,
/// flip metadata back under the lock, then clear retired slots.
pub(crate) fn save_once(shared: &Shared) -> Result<()> {
    let _serial = shared.save_serial.lock();

    let (job, snapshots) = {
        let mut state = shared.state.lock();
        let state = &mut *state;
        // The newest assigned id may belong to a still-active transaction.
        // That is fine: the snapshot serializes committed versions only,
        // and recovery replays the whole active WAL side, so a transaction
        // at or below this id that commits after the flip still lands on
        // the new side and is reapplied. The id itself is persisted purely
        // as the floor for fresh ids after recovery.
        let snapshot_txn = state.txns.newest_assigned();
        let snapshots: Vec<TableSnapshot> = state
            .tables
            .iter()
            .map(|table| table.snapshot(snapshot_txn))
            .collect();
        (state.durability.begin_save(snapshot_txn), snapshots)
    };

    let part_count = {
        let mut writer = job.snapshot_writer();
        for snapshot in &snapshots {
            writer.begin_table(snapshot.table(), snapshot.live_count() as u64)?;
            for (key, object) in snapshot.iter() {
                writer.row(key, object)?;
            }
        }
        writer.finish()?
    };

    {
        let mut state = shared.state.lock();
        state.durability.commit_save(&job, part_count)?;
    }
    job.cleanup(part_count);
    Ok(())
}
