//! Table proxies and range queries
//!
//! Two surfaces over the same operations: [`TxnTable`] joins the
//! transaction it was created in, while [`Table`] opens a one-shot
//! transaction per call with the usual conflict-retry loop. Range queries
//! are built with `by(index).equals(..)` / `between(..)` and finish with
//! `entries`, `first`, `count`, `update_each` or `delete_all`.
//!
//! `:id` names the primary index; any other reference is a key path
//! (`email`, `address.city`) or a bracketed compound (`[last+first]`),
//! which may also name a strict prefix of a compound index.

use crate::database::Database;
use tessera_core::{Key, KeyRange, Result, Value};
use tessera_schema::IndexRef;
use tessera_store::{Matcher, TxnId};

/// Handle to a transaction passed to the `transaction()` body.
pub struct Txn<'db> {
    db: &'db Database,
    id: TxnId,
}

impl<'db> Txn<'db> {
    pub(crate) fn new(db: &'db Database, id: TxnId) -> Self {
        Txn { db, id }
    }

    /// This transaction's id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// A table proxy joined to this transaction.
    pub fn table(&self, name: &str) -> Result<TxnTable<'db>> {
        let index = self.db.shared.state.lock().table_index(name)?;
        Ok(TxnTable {
            db: self.db,
            txn: self.id,
            index,
            name: name.to_string(),
        })
    }
}

/// One table, seen from inside a transaction.
#[derive(Clone)]
pub struct TxnTable<'db> {
    db: &'db Database,
    txn: TxnId,
    index: usize,
    name: String,
}

impl<'db> TxnTable<'db> {
    /// Insert a row, returning its (possibly auto-assigned) primary key.
    pub fn add(&self, row: Value) -> Result<Key> {
        self.insert(row, None)
    }

    /// Insert a row under an extrinsic primary key.
    pub fn add_with_key(&self, key: Key, row: Value) -> Result<Key> {
        self.insert(row, Some(key))
    }

    fn insert(&self, mut row: Value, supplied: Option<Key>) -> Result<Key> {
        let mut state = self.db.shared.state.lock();
        let state = &mut *state;
        state.txns.get(self.txn)?.ensure_active()?;
        let table = &mut state.tables[self.index];
        let key = table.prepare_insert(&mut row, supplied)?;
        table.add(self.txn, key.clone(), row.clone())?;
        state
            .txns
            .get_mut(self.txn)?
            .record_write(&self.name, key.clone(), Some(row));
        Ok(key)
    }

    /// Read the row under `key`; `None` when absent or deleted.
    pub fn get(&self, key: &Key) -> Result<Option<Value>> {
        let mut state = self.db.shared.state.lock();
        let state = &mut *state;
        state.txns.get(self.txn)?.ensure_active()?;
        Ok(state.tables[self.index].get(self.txn, key))
    }

    /// Rewrite the row under `key` through `f`; `f` returning `None`
    /// deletes it. Returns `false` when no row was visible.
    pub fn update(&self, key: &Key, f: impl FnOnce(&Value) -> Option<Value>) -> Result<bool> {
        let mut state = self.db.shared.state.lock();
        let state = &mut *state;
        state.txns.get(self.txn)?.ensure_active()?;
        let table = &mut state.tables[self.index];

        let Some(current) = table.get(self.txn, key) else {
            return Ok(false);
        };
        match f(&current) {
            None => {
                let changed = table.delete(self.txn, key)?;
                if changed {
                    state
                        .txns
                        .get_mut(self.txn)?
                        .record_write(&self.name, key.clone(), None);
                }
                Ok(changed)
            }
            Some(new_object) => {
                let new_key = table
                    .schema()
                    .primary
                    .extract(&new_object)
                    .unwrap_or_else(|| key.clone());
                let changed = table.update(self.txn, key, |_| Some(new_object.clone()))?;
                if changed {
                    let txn = state.txns.get_mut(self.txn)?;
                    if new_key != *key {
                        txn.record_write(&self.name, key.clone(), None);
                    }
                    txn.record_write(&self.name, new_key, Some(new_object));
                }
                Ok(changed)
            }
        }
    }

    /// Delete the row under `key`. Deleting an absent or already-deleted
    /// row returns `false` and is a no-op, so retries are safe.
    pub fn delete(&self, key: &Key) -> Result<bool> {
        let mut state = self.db.shared.state.lock();
        let state = &mut *state;
        state.txns.get(self.txn)?.ensure_active()?;
        let changed = state.tables[self.index].delete(self.txn, key)?;
        if changed {
            state
                .txns
                .get_mut(self.txn)?
                .record_write(&self.name, key.clone(), None);
        }
        Ok(changed)
    }

    /// Number of live rows visible to this transaction.
    pub fn count(&self) -> Result<usize> {
        let state = self.db.shared.state.lock();
        state.txns.get(self.txn)?.ensure_active()?;
        Ok(state.tables[self.index].count(self.txn))
    }

    /// All visible rows, ascending by primary key.
    pub fn entries(&self) -> Result<Vec<(Key, Value)>> {
        let mut state = self.db.shared.state.lock();
        let state = &mut *state;
        state.txns.get(self.txn)?.ensure_active()?;
        Ok(state.tables[self.index].entries(self.txn))
    }

    /// Start a range query against an index.
    pub fn by(&self, index: &str) -> Result<Query<'db>> {
        Ok(Query {
            table: self.clone(),
            index_ref: IndexRef::parse(index)?,
        })
    }

    fn select(&self, index_ref: &IndexRef, matcher: &Matcher) -> Result<Vec<(Key, Value)>> {
        let mut state = self.db.shared.state.lock();
        let state = &mut *state;
        state.txns.get(self.txn)?.ensure_active()?;
        state.tables[self.index].select(self.txn, index_ref, matcher)
    }
}

/// Builder choosing the matched key range.
pub struct Query<'db> {
    table: TxnTable<'db>,
    index_ref: IndexRef,
}

impl<'db> Query<'db> {
    fn with(self, matcher: Matcher) -> Selection<'db> {
        Selection {
            table: self.table,
            index_ref: self.index_ref,
            matcher,
        }
    }

    /// Match exactly this key (or compound prefix).
    pub fn equals(self, key: impl Into<Key>) -> Selection<'db> {
        self.with(Matcher::Equals(key.into()))
    }

    /// Match keys strictly above.
    pub fn above(self, key: impl Into<Key>) -> Selection<'db> {
        self.with(Matcher::Range(KeyRange::above(key.into(), false)))
    }

    /// Match keys at or above.
    pub fn above_or_equal(self, key: impl Into<Key>) -> Selection<'db> {
        self.with(Matcher::Range(KeyRange::above(key.into(), true)))
    }

    /// Match keys strictly below.
    pub fn below(self, key: impl Into<Key>) -> Selection<'db> {
        self.with(Matcher::Range(KeyRange::below(key.into(), false)))
    }

    /// Match keys at or below.
    pub fn below_or_equal(self, key: impl Into<Key>) -> Selection<'db> {
        self.with(Matcher::Range(KeyRange::below(key.into(), true)))
    }

    /// Match keys between two bounds with per-end inclusivity.
    pub fn between(
        self,
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_inclusive: bool,
        upper_inclusive: bool,
    ) -> Selection<'db> {
        self.with(Matcher::Range(KeyRange::between(
            lower.into(),
            upper.into(),
            lower_inclusive,
            upper_inclusive,
        )))
    }

    /// Match every key of the index.
    pub fn any(self) -> Selection<'db> {
        self.with(Matcher::Range(KeyRange::all()))
    }
}

/// A bound range query, ready to execute.
pub struct Selection<'db> {
    table: TxnTable<'db>,
    index_ref: IndexRef,
    matcher: Matcher,
}

impl Selection<'_> {
    /// Matching rows in index-key order.
    pub fn entries(&self) -> Result<Vec<(Key, Value)>> {
        self.table.select(&self.index_ref, &self.matcher)
    }

    /// First matching row, if any.
    pub fn first(&self) -> Result<Option<(Key, Value)>> {
        Ok(self.entries()?.into_iter().next())
    }

    /// Number of matching rows.
    pub fn count(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    /// Rewrite each matching row through `f`; `None` deletes. Returns the
    /// number of rows changed.
    pub fn update_each(&self, f: impl Fn(&Value) -> Option<Value>) -> Result<usize> {
        let hits = self.entries()?;
        let mut changed = 0;
        for (key, _) in hits {
            if self.table.update(&key, |row| f(row))? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Delete every matching row. Returns the number deleted.
    pub fn delete_all(&self) -> Result<usize> {
        let hits = self.entries()?;
        let mut deleted = 0;
        for (key, _) in hits {
            if self.table.delete(&key)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Auto-commit proxy: every call is its own retried transaction.
pub struct Table<'db> {
    db: &'db Database,
    name: String,
}

impl<'db> Table<'db> {
    pub(crate) fn new(db: &'db Database, name: String) -> Self {
        Table { db, name }
    }

    /// Insert a row in its own transaction.
    pub fn add(&self, row: Value) -> Result<Key> {
        self.db
            .transaction(|txn| txn.table(&self.name)?.add(row.clone()))
    }

    /// Insert a row under an extrinsic key in its own transaction.
    pub fn add_with_key(&self, key: Key, row: Value) -> Result<Key> {
        self.db
            .transaction(|txn| txn.table(&self.name)?.add_with_key(key.clone(), row.clone()))
    }

    /// Read one row.
    pub fn get(&self, key: &Key) -> Result<Option<Value>> {
        self.db.transaction(|txn| txn.table(&self.name)?.get(key))
    }

    /// Rewrite one row. `f` may run multiple times under retry and must be
    /// pure.
    pub fn update(&self, key: &Key, f: impl Fn(&Value) -> Option<Value>) -> Result<bool> {
        self.db
            .transaction(|txn| txn.table(&self.name)?.update(key, |row| f(row)))
    }

    /// Delete one row.
    pub fn delete(&self, key: &Key) -> Result<bool> {
        self.db.transaction(|txn| txn.table(&self.name)?.delete(key))
    }

    /// Number of live rows.
    pub fn count(&self) -> Result<usize> {
        self.db.transaction(|txn| txn.table(&self.name)?.count())
    }

    /// All rows, ascending by primary key.
    pub fn entries(&self) -> Result<Vec<(Key, Value)>> {
        self.db.transaction(|txn| txn.table(&self.name)?.entries())
    }

    /// Start an auto-commit range query.
    pub fn by(&self, index: &str) -> Result<AutoQuery<'db>> {
        Ok(AutoQuery {
            db: self.db,
            name: self.name.clone(),
            index_ref: IndexRef::parse(index)?,
        })
    }
}

/// Auto-commit counterpart of [`Query`].
pub struct AutoQuery<'db> {
    db: &'db Database,
    name: String,
    index_ref: IndexRef,
}

impl<'db> AutoQuery<'db> {
    fn with(self, matcher: Matcher) -> AutoSelection<'db> {
        AutoSelection {
            db: self.db,
            name: self.name,
            index_ref: self.index_ref,
            matcher,
        }
    }

    /// Match exactly this key (or compound prefix).
    pub fn equals(self, key: impl Into<Key>) -> AutoSelection<'db> {
        self.with(Matcher::Equals(key.into()))
    }

    /// Match keys strictly above.
    pub fn above(self, key: impl Into<Key>) -> AutoSelection<'db> {
        self.with(Matcher::Range(KeyRange::above(key.into(), false)))
    }

    /// Match keys at or above.
    pub fn above_or_equal(self, key: impl Into<Key>) -> AutoSelection<'db> {
        self.with(Matcher::Range(KeyRange::above(key.into(), true)))
    }

    /// Match keys strictly below.
    pub fn below(self, key: impl Into<Key>) -> AutoSelection<'db> {
        self.with(Matcher::Range(KeyRange::below(key.into(), false)))
    }

    /// Match keys at or below.
    pub fn below_or_equal(self, key: impl Into<Key>) -> AutoSelection<'db> {
        self.with(Matcher::Range(KeyRange::below(key.into(), true)))
    }

    /// Match keys between two bounds with per-end inclusivity.
    pub fn between(
        self,
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_inclusive: bool,
        upper_inclusive: bool,
    ) -> AutoSelection<'db> {
        self.with(Matcher::Range(KeyRange::between(
            lower.into(),
            upper.into(),
            lower_inclusive,
            upper_inclusive,
        )))
    }

    /// Match every key of the index.
    pub fn any(self) -> AutoSelection<'db> {
        self.with(Matcher::Range(KeyRange::all()))
    }
}

/// Auto-commit counterpart of [`Selection`]; each finisher runs one
/// retried transaction.
pub struct AutoSelection<'db> {
    db: &'db Database,
    name: String,
    index_ref: IndexRef,
    matcher: Matcher,
}

impl AutoSelection<'_> {
    fn in_txn<T>(&self, f: impl Fn(&Selection<'_>) -> Result<T>) -> Result<T> {
        self.db.transaction(|txn| {
            let selection = Selection {
                table: txn.table(&self.name)?,
                index_ref: self.index_ref.clone(),
                matcher: self.matcher.clone(),
            };
            f(&selection)
        })
    }

    /// Matching rows in index-key order.
    pub fn entries(&self) -> Result<Vec<(Key, Value)>> {
        self.in_txn(|s| s.entries())
    }

    /// First matching row, if any.
    pub fn first(&self) -> Result<Option<(Key, Value)>> {
        self.in_txn(|s| s.first())
    }

    /// Number of matching rows.
    pub fn count(&self) -> Result<usize> {
        self.in_txn(|s| s.count())
    }

    /// Rewrite each matching row through `f` in one transaction.
    pub fn update_each(&self, f: impl Fn(&Value) -> Option<Value>) -> Result<usize> {
        self.in_txn(|s| s.update_each(|row| f(row)))
    }

    /// Delete every matching row in one transaction.
    pub fn delete_all(&self) -> Result<usize> {
        self.in_txn(|s| s.delete_all())
    }
}
