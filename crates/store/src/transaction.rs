//! Transaction records
//!
//! A transaction tracks its id, lifecycle state, and per-table write set.
//! The write set holds the post-image of every touched primary key
//! (`None` for a staged delete); it is what the engine settles or revokes
//! at commit/abort, feeds into the WAL entry, and hands to the garbage
//! collector once the transaction ends.
//!
//! State transitions:
//! - `Active` → `Committing` (settle begins)
//! - `Committing` → `Committed`
//! - `Active` | `Committing` → `Aborted`
//!
//! `Committed` and `Aborted` are terminal.

use crate::version::TxnId;
use std::collections::BTreeMap;
use tessera_collections::OrdMap;
use tessera_core::{Error, Key, Result, Value};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Executing; may read and write.
    Active,
    /// Settling staged versions.
    Committing,
    /// Finished successfully.
    Committed,
    /// Rolled back; staged versions revoked.
    Aborted,
}

/// One transaction's identity, state and write set.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TxnId,
    state: TxnState,
    writes: BTreeMap<String, OrdMap<Key, Option<Value>>>,
}

impl Transaction {
    /// A fresh `Active` transaction.
    pub fn new(id: TxnId) -> Self {
        Transaction {
            id,
            state: TxnState::Active,
            writes: BTreeMap::new(),
        }
    }

    /// Transaction id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// True while operations may be recorded.
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Guard used by every operation entry point.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "transaction {} is {:?}, not active",
                self.id, self.state
            )))
        }
    }

    /// Record the post-image of a mutated row. Later writes to the same
    /// key replace earlier ones; the WAL carries only the final image.
    pub fn record_write(&mut self, table: &str, key: Key, image: Option<Value>) {
        let per_table = self.writes.entry(table.to_string()).or_default();
        *per_table = per_table.insert(key, image);
    }

    /// Per-table write sets, tables in name order, keys in key order.
    pub fn writes(&self) -> &BTreeMap<String, OrdMap<Key, Option<Value>>> {
        &self.writes
    }

    /// True when at least one row was written.
    pub fn has_writes(&self) -> bool {
        self.writes.values().any(|m| !m.is_empty())
    }

    /// All touched `(table, keys)` pairs, for settle/revoke/GC sweeps.
    pub fn touched_keys(&self) -> Vec<(String, Vec<Key>)> {
        self.writes
            .iter()
            .map(|(table, keys)| (table.clone(), keys.keys().cloned().collect()))
            .collect()
    }

    /// `Active` → `Committing`.
    pub fn mark_committing(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TxnState::Committing;
        Ok(())
    }

    /// `Committing` → `Committed`.
    pub fn mark_committed(&mut self) -> Result<()> {
        if self.state != TxnState::Committing {
            return Err(Error::InvalidState(format!(
                "transaction {} cannot commit from {:?}",
                self.id, self.state
            )));
        }
        self.state = TxnState::Committed;
        Ok(())
    }

    /// `Active` | `Committing` → `Aborted`.
    pub fn mark_aborted(&mut self) -> Result<()> {
        match self.state {
            TxnState::Active | TxnState::Committing => {
                self.state = TxnState::Aborted;
                Ok(())
            }
            _ => Err(Error::InvalidState(format!(
                "transaction {} cannot abort from {:?}",
                self.id, self.state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(n: i64) -> Value {
        Value::record([("n", Value::Int(n))])
    }

    #[test]
    fn test_new_transaction_is_active_and_empty() {
        let txn = Transaction::new(3);
        assert_eq!(txn.id(), 3);
        assert!(txn.is_active());
        assert!(!txn.has_writes());
        assert!(txn.touched_keys().is_empty());
    }

    #[test]
    fn test_record_write_keeps_final_image() {
        let mut txn = Transaction::new(1);
        txn.record_write("t", Key::Int(1), Some(obj(1)));
        txn.record_write("t", Key::Int(1), Some(obj(2)));
        txn.record_write("t", Key::Int(2), None);
        assert!(txn.has_writes());
        let writes = &txn.writes()["t"];
        assert_eq!(writes.len(), 2);
        assert_eq!(writes.get(&Key::Int(1)), Some(&Some(obj(2))));
        assert_eq!(writes.get(&Key::Int(2)), Some(&None));
    }

    #[test]
    fn test_touched_keys_ordered() {
        let mut txn = Transaction::new(1);
        txn.record_write("b", Key::Int(2), None);
        txn.record_write("a", Key::Int(9), None);
        txn.record_write("b", Key::Int(1), None);
        let touched = txn.touched_keys();
        assert_eq!(touched[0].0, "a");
        assert_eq!(touched[1].0, "b");
        assert_eq!(touched[1].1, vec![Key::Int(1), Key::Int(2)]);
    }

    #[test]
    fn test_commit_path() {
        let mut txn = Transaction::new(1);
        txn.mark_committing().unwrap();
        assert!(!txn.is_active());
        txn.mark_committed().unwrap();
        assert_eq!(txn.state(), TxnState::Committed);
    }

    #[test]
    fn test_abort_from_active_and_committing() {
        let mut txn = Transaction::new(1);
        txn.mark_aborted().unwrap();
        assert_eq!(txn.state(), TxnState::Aborted);

        let mut txn = Transaction::new(2);
        txn.mark_committing().unwrap();
        txn.mark_aborted().unwrap();
        assert_eq!(txn.state(), TxnState::Aborted);
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut txn = Transaction::new(1);
        txn.mark_committing().unwrap();
        txn.mark_committed().unwrap();
        assert!(txn.mark_aborted().is_err());
        assert!(txn.mark_committing().is_err());
        assert!(txn.mark_committed().is_err());

        let mut txn = Transaction::new(2);
        txn.mark_aborted().unwrap();
        assert!(txn.mark_committing().is_err());
        assert!(txn.mark_committed().is_err());
        assert!(txn.mark_aborted().is_err());
    }

    #[test]
    fn test_ensure_active_guard() {
        let mut txn = Transaction::new(1);
        assert!(txn.ensure_active().is_ok());
        txn.mark_committing().unwrap();
        assert!(matches!(
            txn.ensure_active(),
            Err(Error::InvalidState(_))
        ));
    }
}
