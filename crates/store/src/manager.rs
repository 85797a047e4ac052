//! Transaction manager
//!
//! Assigns monotone transaction ids, tracks the active set in an ordered
//! set, and coordinates cross-table garbage collection: a finished
//! transaction's touched keys are queued, and the queue drains whenever a
//! transaction ends with no older transaction still active. The ending id
//! is then the horizon: every version whose lifetime closed at or before
//! it is invisible to all current and future transactions.

use crate::transaction::{Transaction, TxnState};
use crate::version::TxnId;
use std::collections::BTreeMap;
use tessera_collections::OrdSet;
use tessera_core::{Error, Key, Result};
use tracing::debug;

/// Keys to collect, grouped per table, once a horizon is established.
#[derive(Debug, Clone, PartialEq)]
pub struct GcBatch {
    /// Collect versions with `end <= horizon`.
    pub horizon: TxnId,
    /// Touched primary keys per table.
    pub tables: BTreeMap<String, Vec<Key>>,
}

/// Registry of live transactions and the pending-GC queue.
#[derive(Debug)]
pub struct TransactionManager {
    next_id: TxnId,
    active: OrdSet<TxnId>,
    records: BTreeMap<TxnId, Transaction>,
    pending_gc: BTreeMap<TxnId, Vec<(String, Vec<Key>)>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        TransactionManager::new()
    }
}

impl TransactionManager {
    /// An empty manager; the first transaction gets id 1.
    pub fn new() -> Self {
        TransactionManager::starting_at(1)
    }

    /// An empty manager whose first transaction gets `next_id`.
    ///
    /// Recovery uses this so ids stay monotone across restarts: replayed
    /// WAL entries keep their recorded ids, and new transactions must sort
    /// after all of them.
    pub fn starting_at(next_id: TxnId) -> Self {
        TransactionManager {
            next_id: next_id.max(1),
            active: OrdSet::new(),
            records: BTreeMap::new(),
            pending_gc: BTreeMap::new(),
        }
    }

    /// Start a transaction and return its id.
    pub fn begin(&mut self) -> TxnId {
        let id = self.next_id;
        self.next_id += 1;
        self.active = self.active.insert(id);
        self.records.insert(id, Transaction::new(id));
        debug!(txn = id, "transaction begun");
        id
    }

    /// The record for `id`.
    pub fn get(&self, id: TxnId) -> Result<&Transaction> {
        self.records
            .get(&id)
            .ok_or_else(|| Error::InvalidState(format!("unknown transaction {id}")))
    }

    /// The record for `id`, mutable.
    pub fn get_mut(&mut self, id: TxnId) -> Result<&mut Transaction> {
        self.records
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidState(format!("unknown transaction {id}")))
    }

    /// Ids currently active, ascending.
    pub fn active_ids(&self) -> Vec<TxnId> {
        self.active.iter().copied().collect()
    }

    /// Largest id handed out so far.
    ///
    /// This id may belong to a transaction that is still active, so it is
    /// NOT a committed watermark: a durable snapshot taken at it must
    /// additionally restrict itself to committed versions
    /// (`VersionChain::committed_visible`), which a transaction-visibility
    /// read at this id would not. Recovery uses the value persisted at save
    /// time as the floor for handing out fresh ids.
    pub fn newest_assigned(&self) -> TxnId {
        self.next_id - 1
    }

    /// Remove a finished transaction and decide whether garbage collection
    /// can run.
    ///
    /// Committed write sets join the pending queue. When no remaining
    /// active transaction is older than the ending one, the ending id
    /// becomes the horizon and every queued entry at or below it drains
    /// into the returned batch.
    pub fn finish(&mut self, id: TxnId) -> Result<Option<GcBatch>> {
        let record = self
            .records
            .remove(&id)
            .ok_or_else(|| Error::InvalidState(format!("unknown transaction {id}")))?;
        self.active = self.active.remove(&id);

        match record.state() {
            TxnState::Committed => {
                if record.has_writes() {
                    self.pending_gc.insert(id, record.touched_keys());
                }
            }
            TxnState::Aborted => {}
            state => {
                return Err(Error::InvalidState(format!(
                    "transaction {id} finished while {state:?}"
                )));
            }
        }

        let has_older_active = self.active.first().is_some_and(|oldest| *oldest < id);
        if has_older_active {
            return Ok(None);
        }

        let horizon = id;
        let mut drained: Vec<(TxnId, Vec<(String, Vec<Key>)>)> = Vec::new();
        let keep = self.pending_gc.split_off(&(horizon + 1));
        for (tid, touched) in std::mem::replace(&mut self.pending_gc, keep) {
            drained.push((tid, touched));
        }
        if drained.is_empty() {
            return Ok(None);
        }

        let mut tables: BTreeMap<String, Vec<Key>> = BTreeMap::new();
        for (_, touched) in drained {
            for (table, keys) in touched {
                tables.entry(table).or_default().extend(keys);
            }
        }
        for keys in tables.values_mut() {
            keys.sort();
            keys.dedup();
        }
        debug!(horizon, tables = tables.len(), "garbage collection horizon");
        Ok(Some(GcBatch { horizon, tables }))
    }
}
