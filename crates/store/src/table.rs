//! MVCC table store
//!
//! State per table: the schema, a persistent map from primary key to
//! version chain, and one persistent map per secondary index from indexed
//! key to a set of primary keys.
//!
//! Secondary indices are maintained as an over-approximation: entries for
//! superseded or revoked versions may linger until garbage collection, but
//! a key extracted from any live version is always present. Lookups through
//! a secondary index therefore re-validate against the visible row.
//!
//! Conflict rules, in one place:
//! - writing a row whose newest version is locked by another transaction
//!   conflicts;
//! - writing a row whose newest version was read or written by a newer
//!   transaction conflicts;
//! - deleting an already-deleted row is a no-op (idempotence under retry);
//! - inserting onto a visible live row is a uniqueness violation, as is a
//!   unique-secondary collision with a visible live competitor.

use crate::matcher::Matcher;
use crate::version::{RowVersion, TxnId, VersionChain};
use std::collections::BTreeSet;
use tessera_collections::{OrdMap, OrdSet};
use tessera_core::{Error, Key, Result, SchemaError, Value};
use tessera_schema::{IndexRef, IndexTarget, TableSchema};
use tracing::trace;

/// One table: row storage plus secondary indices.
#[derive(Debug, Clone)]
pub struct TableStore {
    id: String,
    schema: TableSchema,
    rows: OrdMap<Key, VersionChain>,
    indices: Vec<OrdMap<Key, OrdSet<Key>>>,
    next_auto: i64,
}

impl TableStore {
    /// Create an empty table.
    pub fn new(id: impl Into<String>, schema: TableSchema) -> Self {
        let indices = vec![OrdMap::new(); schema.indices.len()];
        TableStore {
            id: id.into(),
            schema,
            rows: OrdMap::new(),
            indices,
            next_auto: 1,
        }
    }

    /// Table identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The table's schema.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Total rows present, including tombstoned ones awaiting collection.
    pub fn raw_len(&self) -> usize {
        self.rows.len()
    }

    // === Reads ===

    /// Read the row `tid` sees under `pkey`; `None` for absent or deleted.
    ///
    /// Marks the visible version as read by `tid`, which is what makes a
    /// later write by an older transaction conflict. Returns a defensive
    /// clone. Never fails.
    pub fn get(&mut self, tid: TxnId, pkey: &Key) -> Option<Value> {
        let chain = self.rows.get(pkey)?;
        let version = chain.visible(tid)?;
        let object = version.object.clone();
        if version.last_reader < tid {
            let mut updated = chain.clone();
            if let Some(v) = updated.visible_mut(tid) {
                v.last_reader = tid;
            }
            self.rows = self.rows.insert(pkey.clone(), updated);
        }
        object
    }

    /// All rows visible to `tid`, ascending by primary key.
    ///
    /// Each visited row is read-marked like [`TableStore::get`]. Iteration
    /// takes no gap locks: rows inserted by a later transaction between two
    /// visited keys are not protected against (no phantom protection).
    pub fn entries(&mut self, tid: TxnId) -> Vec<(Key, Value)> {
        // Iterate an O(1) clone so read marks can land on the live map.
        let snapshot = self.rows.clone();
        let mut out = Vec::new();
        for (pkey, chain) in snapshot.iter() {
            if let Some((key, object)) = self.observe_row(tid, pkey, chain) {
                out.push((key, object));
            }
        }
        out
    }

    fn observe_row(
        &mut self,
        tid: TxnId,
        pkey: &Key,
        chain: &VersionChain,
    ) -> Option<(Key, Value)> {
        let version = chain.visible(tid)?;
        if version.last_reader < tid {
            let mut updated = chain.clone();
            if let Some(v) = updated.visible_mut(tid) {
                v.last_reader = tid;
            }
            self.rows = self.rows.insert(pkey.clone(), updated);
        }
        version.object.as_ref().map(|o| (pkey.clone(), o.clone()))
    }

    /// Number of rows visible and live to `tid`. Counting does not
    /// read-mark.
    pub fn count(&self, tid: TxnId) -> usize {
        self.rows
            .values()
            .filter(|chain| chain.visible(tid).is_some_and(|v| v.is_live()))
            .count()
    }

    /// Range-match rows through the primary key or a secondary index.
    ///
    /// Primary matches read-mark visited rows; secondary matches do not
    /// (and take no locks at all). Results come back in index-key order,
    /// deduplicated by primary key for multi-entry indices.
    pub fn select(
        &mut self,
        tid: TxnId,
        index_ref: &IndexRef,
        matcher: &Matcher,
    ) -> Result<Vec<(Key, Value)>> {
        let selection =
            self.schema
                .resolve(index_ref)
                .ok_or_else(|| SchemaError::UnknownIndex {
                    table: self.id.clone(),
                    index: index_ref.display_name(),
                })?;
        let range = matcher.effective_range(selection.prefix_len, selection.total_len);
        match selection.target {
            IndexTarget::Primary => {
                let snapshot = self.rows.clone();
                let mut out = Vec::new();
                for (pkey, chain) in snapshot.range(range) {
                    if let Some(entry) = self.observe_row(tid, pkey, chain) {
                        out.push(entry);
                    }
                }
                Ok(out)
            }
            IndexTarget::Secondary(slot) => Ok(self.select_secondary(tid, slot, range)),
        }
    }

    fn select_secondary(
        &self,
        tid: TxnId,
        slot: usize,
        range: tessera_core::KeyRange,
    ) -> Vec<(Key, Value)> {
        let descriptor = &self.schema.indices[slot];
        let mut seen: BTreeSet<Key> = BTreeSet::new();
        let mut out = Vec::new();
        for (ikey, owners) in self.indices[slot].range(range) {
            for pkey in owners.iter() {
                if seen.contains(pkey) {
                    continue;
                }
                // The index over-approximates: validate against the row.
                let Some(chain) = self.rows.get(pkey) else {
                    continue;
                };
                let Some(version) = chain.visible(tid) else {
                    continue;
                };
                let Some(object) = &version.object else {
                    continue;
                };
                if !descriptor.extract_keys(object).contains(ikey) {
                    continue;
                }
                seen.insert(pkey.clone());
                out.push((pkey.clone(), object.clone()));
            }
        }
        out
    }

    // === Writes ===

    /// Derive (or assign) the primary key for a row about to be inserted.
    ///
    /// Intrinsic tables extract the key from the row, assigning the next
    /// auto-increment value (and injecting it into the row) when the field
    /// is absent. Extrinsic tables require `supplied`.
    pub fn prepare_insert(&mut self, row: &mut Value, supplied: Option<Key>) -> Result<Key> {
        if self.schema.primary.is_intrinsic() {
            if supplied.is_some() {
                return Err(Error::InvalidState(format!(
                    "table '{}' computes its primary key from the row",
                    self.id
                )));
            }
            if let Some(key) = self.schema.primary.extract(row) {
                self.observe_key(&key);
                return Ok(key);
            }
            if self.schema.primary.auto_increment {
                let assigned = self.next_auto;
                self.next_auto += 1;
                inject_int_field(row, self.schema.primary.paths[0].segments(), assigned);
                return Ok(Key::Int(assigned));
            }
            return Err(SchemaError::MissingKeyPath {
                table: self.id.clone(),
                path: self.schema.primary.name(),
            }
            .into());
        }
        let key = supplied.ok_or_else(|| {
            Error::InvalidState(format!(
                "table '{}' requires the primary key alongside the row",
                self.id
            ))
        })?;
        if key.has_sentinel() {
            return Err(Error::InvalidState(
                "sentinel keys cannot be stored".to_string(),
            ));
        }
        self.observe_key(&key);
        Ok(key)
    }

    /// Insert a row under `pkey` as transaction `tid`.
    ///
    /// Requires the slot to be free from `tid`'s point of view: no row, a
    /// committed tombstone, or `tid`'s own staged delete. A visible live
    /// row is a uniqueness violation; a newer reader/writer is a conflict.
    pub fn add(&mut self, tid: TxnId, pkey: Key, object: Value) -> Result<()> {
        if let Some(chain) = self.rows.get(&pkey).cloned() {
            let latest = chain.latest().expect("stored chains are never empty");
            if latest.is_locked_by(tid) {
                if latest.is_live() {
                    return Err(self.unique_violation(":id", &pkey));
                }
                // Re-inserting over our own staged delete: swap it out.
                self.check_unique(tid, &pkey, &object)?;
                let mut updated = chain;
                updated.latest_mut().expect("non-empty").object = Some(object.clone());
                self.rows = self.rows.insert(pkey.clone(), updated);
                self.index_object(&pkey, &object);
                self.observe_key(&pkey);
                return Ok(());
            }
            self.write_barrier(tid, &pkey, latest)?;
            if latest.is_live() && latest.visible_to(tid) {
                return Err(self.unique_violation(":id", &pkey));
            }
            self.check_unique(tid, &pkey, &object)?;
            let mut updated = chain;
            updated.push_newest(RowVersion::locked(tid, Some(object.clone())));
            self.rows = self.rows.insert(pkey.clone(), updated);
            self.index_object(&pkey, &object);
            self.observe_key(&pkey);
            return Ok(());
        }
        self.check_unique(tid, &pkey, &object)?;
        self.rows = self.rows.insert(
            pkey.clone(),
            VersionChain::single(RowVersion::locked(tid, Some(object.clone()))),
        );
        self.index_object(&pkey, &object);
        self.observe_key(&pkey);
        Ok(())
    }

    /// Rewrite the row visible to `tid` through `f`.
    ///
    /// Returns `false` when no live row is visible. `f` returning `None`
    /// stages a tombstone. A changed intrinsic primary key stages a
    /// tombstone under the old key and re-inserts under the new one; any
    /// failure of the re-insert also revokes the tombstone.
    pub fn update(
        &mut self,
        tid: TxnId,
        pkey: &Key,
        f: impl FnOnce(&Value) -> Option<Value>,
    ) -> Result<bool> {
        let Some(chain) = self.rows.get(pkey).cloned() else {
            return Ok(false);
        };
        let Some(current) = chain.visible(tid).and_then(|v| v.object.clone()) else {
            return Ok(false);
        };
        let latest = chain.latest().expect("non-empty").clone();
        match f(&current) {
            None => {
                self.write_barrier(tid, pkey, &latest)?;
                self.stage(tid, pkey, &chain, None);
                Ok(true)
            }
            Some(new_object) => {
                let new_pkey = if self.schema.primary.is_intrinsic() {
                    self.schema.primary.extract(&new_object).ok_or_else(|| {
                        SchemaError::MissingKeyPath {
                            table: self.id.clone(),
                            path: self.schema.primary.name(),
                        }
                    })?
                } else {
                    pkey.clone()
                };
                if new_pkey == *pkey {
                    self.write_barrier(tid, pkey, &latest)?;
                    self.check_unique(tid, pkey, &new_object)?;
                    self.stage(tid, pkey, &chain, Some(new_object.clone()));
                    self.index_object(pkey, &new_object);
                    Ok(true)
                } else {
                    self.write_barrier(tid, pkey, &latest)?;
                    let saved_rows = self.rows.clone();
                    let saved_indices = self.indices.clone();
                    self.stage(tid, pkey, &chain, None);
                    match self.add(tid, new_pkey, new_object) {
                        Ok(()) => Ok(true),
                        Err(e) => {
                            self.rows = saved_rows;
                            self.indices = saved_indices;
                            Err(e)
                        }
                    }
                }
            }
        }
    }

    /// Stage a tombstone for the row visible to `tid`.
    ///
    /// Returns `false` (a no-op) when the row is absent or already deleted,
    /// so retried transactions can repeat their deletes safely.
    pub fn delete(&mut self, tid: TxnId, pkey: &Key) -> Result<bool> {
        let Some(chain) = self.rows.get(pkey).cloned() else {
            return Ok(false);
        };
        let Some(visible) = chain.visible(tid) else {
            return Ok(false);
        };
        if visible.is_tombstone() {
            return Ok(false);
        }
        let latest = chain.latest().expect("non-empty").clone();
        self.write_barrier(tid, pkey, &latest)?;
        self.stage(tid, pkey, &chain, None);
        Ok(true)
    }

    /// Drop `tid`'s uncommitted newest version of `pkey`, unindexing it.
    pub fn revoke(&mut self, tid: TxnId, pkey: &Key) {
        let Some(chain) = self.rows.get(pkey).cloned() else {
            return;
        };
        if !chain.latest().is_some_and(|l| l.is_locked_by(tid)) {
            return;
        }
        let mut remaining = chain;
        let dropped = remaining.pop_newest().expect("non-empty");
        if remaining.is_empty() {
            self.rows = self.rows.remove(pkey);
        } else {
            self.rows = self.rows.insert(pkey.clone(), remaining.clone());
        }
        if let Some(object) = dropped.object {
            self.unindex_object(pkey, &object, &remaining);
        }
    }

    /// Commit `tid`'s staged version of `pkey`: clear the write lock and
    /// close the superseded version's lifetime at `tid`.
    pub fn settle(&mut self, tid: TxnId, pkey: &Key) {
        let Some(mut chain) = self.rows.get(pkey).cloned() else {
            return;
        };
        {
            let Some(head) = chain.latest_mut() else {
                return;
            };
            if head.writer != Some(tid) {
                return;
            }
            head.writer = None;
        }
        if let Some(previous) = chain.previous_mut() {
            previous.end = tid;
        }
        self.rows = self.rows.insert(pkey.clone(), chain);
    }

    /// Collect versions whose lifetime ended at or before `horizon`.
    ///
    /// A row left with neither a live nor a write-locked version is dropped
    /// entirely. Collected objects are unindexed, except for keys a kept
    /// version of the same row still extracts.
    pub fn gc(&mut self, horizon: TxnId, pkeys: &[Key]) {
        for pkey in pkeys {
            let Some(chain) = self.rows.get(pkey).cloned() else {
                continue;
            };
            let (kept, collected) = chain.partition_by_horizon(horizon);
            let drop_row = !kept.has_live_or_locked();
            let remaining = if drop_row {
                VersionChain::default()
            } else {
                kept.clone()
            };
            for version in &collected {
                if let Some(object) = &version.object {
                    self.unindex_object(pkey, object, &remaining);
                }
            }
            if drop_row {
                // Any kept versions are unlocked tombstones; they carry no
                // index entries and no future reader can tell the difference.
                self.rows = self.rows.remove(pkey);
                trace!(table = %self.id, ?pkey, horizon, "row collected");
            } else if !collected.is_empty() {
                self.rows = self.rows.insert(pkey.clone(), kept);
                trace!(
                    table = %self.id,
                    ?pkey,
                    horizon,
                    collected = collected.len(),
                    "versions collected"
                );
            }
        }
    }

    // === Serialization support ===

    /// O(1) consistent view of the table as of `tid`, for the snapshot
    /// stream. Reading it does not mark rows, and only committed versions
    /// are exposed: `tid` may be the id of a still-active transaction, and
    /// its staged writes must never become durable.
    pub fn snapshot(&self, tid: TxnId) -> TableSnapshot {
        TableSnapshot {
            table: self.id.clone(),
            tid,
            rows: self.rows.clone(),
        }
    }

    /// Install a recovered row, replacing whatever is present. `None`
    /// removes the row. Only used while rebuilding state on load.
    pub fn apply_recovered(&mut self, pkey: Key, object: Option<Value>) {
        if let Some(existing) = self.rows.get(&pkey).cloned() {
            for version in existing.iter() {
                if let Some(old) = &version.object {
                    self.unindex_object(&pkey, old, &VersionChain::default());
                }
            }
            self.rows = self.rows.remove(&pkey);
        }
        if let Some(object) = object {
            self.observe_key(&pkey);
            self.rows = self.rows.insert(
                pkey.clone(),
                VersionChain::single(RowVersion::settled(object.clone())),
            );
            self.index_object(&pkey, &object);
        }
    }

    // === Internals ===

    fn conflict(&self, pkey: &Key) -> Error {
        Error::WriteConflict {
            table: self.id.clone(),
            key: pkey.clone(),
        }
    }

    fn unique_violation(&self, index: &str, key: &Key) -> Error {
        Error::UniquenessViolation {
            table: self.id.clone(),
            index: index.to_string(),
            key: key.clone(),
        }
    }

    /// The write-conflict rules against a row's newest version.
    fn write_barrier(&self, tid: TxnId, pkey: &Key, latest: &RowVersion) -> Result<()> {
        if let Some(writer) = latest.writer {
            if writer != tid {
                return Err(self.conflict(pkey));
            }
        }
        if latest.last_reader > tid || latest.begin > tid {
            return Err(self.conflict(pkey));
        }
        Ok(())
    }

    /// Stage a write-locked version holding `object` (or a tombstone).
    /// Re-staging over `tid`'s own head replaces it in place, preserving
    /// the one-uncommitted-version-per-row invariant.
    fn stage(&mut self, tid: TxnId, pkey: &Key, chain: &VersionChain, object: Option<Value>) {
        let mut updated = chain.clone();
        let mut replaced = None;
        if updated.latest().is_some_and(|l| l.is_locked_by(tid)) {
            let head = updated.latest_mut().expect("non-empty");
            replaced = head.object.take();
            head.object = object;
        } else {
            updated.push_newest(RowVersion::locked(tid, object));
        }
        self.rows = self.rows.insert(pkey.clone(), updated.clone());
        // A replaced staged object's index entries would otherwise dangle
        // forever; committed versions keep theirs until collection.
        if let Some(old) = replaced {
            self.unindex_object(pkey, &old, &updated);
        }
    }

    /// Reject the write when a unique index would map one of the row's
    /// keys to a different, live, visible row. Stale index entries do not
    /// count; the competitor's row is re-extracted to confirm.
    fn check_unique(&self, tid: TxnId, pkey: &Key, object: &Value) -> Result<()> {
        for (slot, descriptor) in self.schema.indices.iter().enumerate() {
            if !descriptor.unique {
                continue;
            }
            for key in descriptor.extract_keys(object) {
                let Some(owners) = self.indices[slot].get(&key) else {
                    continue;
                };
                for owner in owners.iter() {
                    if owner == pkey {
                        continue;
                    }
                    let live = self
                        .rows
                        .get(owner)
                        .and_then(|chain| chain.visible(tid))
                        .and_then(|v| v.object.as_ref())
                        .is_some_and(|o| descriptor.extract_keys(o).contains(&key));
                    if live {
                        return Err(self.unique_violation(&descriptor.name(), &key));
                    }
                }
            }
        }
        Ok(())
    }

    fn index_object(&mut self, pkey: &Key, object: &Value) {
        for (slot, descriptor) in self.schema.indices.iter().enumerate() {
            for key in descriptor.extract_keys(object) {
                self.indices[slot] = self.indices[slot].alter(&key, |owners| {
                    Some(match owners {
                        Some(set) => set.insert(pkey.clone()),
                        None => OrdSet::new().insert(pkey.clone()),
                    })
                });
            }
        }
    }

    /// Remove `pkey` from the entries `object` contributed, keeping any
    /// key that a remaining version of the row still extracts.
    fn unindex_object(&mut self, pkey: &Key, object: &Value, remaining: &VersionChain) {
        for (slot, descriptor) in self.schema.indices.iter().enumerate() {
            let still_needed: Vec<Key> = remaining
                .iter()
                .filter_map(|v| v.object.as_ref())
                .flat_map(|o| descriptor.extract_keys(o))
                .collect();
            for key in descriptor.extract_keys(object) {
                if still_needed.contains(&key) {
                    continue;
                }
                self.indices[slot] = self.indices[slot].alter(&key, |owners| {
                    let trimmed = owners?.remove(pkey);
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed)
                    }
                });
            }
        }
    }

    fn observe_key(&mut self, key: &Key) {
        if let Key::Int(i) = key {
            if *i >= self.next_auto {
                self.next_auto = i + 1;
            }
        }
    }
}

/// A consistent, immutable view of one table as of a transaction id,
/// restricted to committed versions.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    table: String,
    tid: TxnId,
    rows: OrdMap<Key, VersionChain>,
}

impl TableSnapshot {
    /// Table identifier.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Live committed rows at the snapshot id, ascending by primary key.
    /// Write-locked versions are skipped even when the snapshot id equals
    /// their writer's.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> + '_ {
        self.rows.iter().filter_map(move |(key, chain)| {
            chain
                .committed_visible(self.tid)
                .and_then(|v| v.object.as_ref())
                .map(|object| (key, object))
        })
    }

    /// Number of live committed rows in the snapshot.
    pub fn live_count(&self) -> usize {
        self.iter().count()
    }
}

fn inject_int_field(row: &mut Value, segments: &[String], value: i64) {
    let mut cursor = row;
    for segment in &segments[..segments.len() - 1] {
        let needs_map = !matches!(cursor.field(segment), Some(Value::Map(_)));
        if needs_map {
            cursor.set_field(segment.clone(), Value::Map(Default::default()));
        }
        cursor = cursor
            .field_mut(segment)
            .expect("intermediate map just ensured");
    }
    cursor.set_field(
        segments.last().expect("key paths are non-empty").clone(),
        Value::Int(value),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::KeyRange;
    use tessera_schema::parse_table_schema;

    fn table(spec: &str) -> TableStore {
        TableStore::new("t", parse_table_schema("t", spec).unwrap())
    }

    fn row(id: i64, name: &str) -> Value {
        Value::record([("id", Value::Int(id)), ("name", name.into())])
    }

    fn add_settled(t: &mut TableStore, tid: TxnId, row: Value) -> Key {
        let mut row = row;
        let key = t.prepare_insert(&mut row, None).unwrap();
        t.add(tid, key.clone(), row).unwrap();
        t.settle(tid, &key);
        key
    }

    // === Visibility (get) ===

    #[test]
    fn test_get_returns_inserted_row() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        assert_eq!(t.get(2, &key), Some(row(1, "a")));
    }

    #[test]
    fn test_uncommitted_row_visible_only_to_writer() {
        let mut t = table("id");
        let mut r = row(1, "a");
        let key = t.prepare_insert(&mut r, None).unwrap();
        t.add(5, key.clone(), r).unwrap();
        assert_eq!(t.get(5, &key), Some(row(1, "a")));
        assert_eq!(t.get(6, &key), None);
        assert_eq!(t.get(4, &key), None);
    }

    #[test]
    fn test_commit_visible_to_newer_only() {
        let mut t = table("id");
        let key = add_settled(&mut t, 5, row(1, "a"));
        assert_eq!(t.get(5, &key), Some(row(1, "a")));
        assert_eq!(t.get(6, &key), Some(row(1, "a")));
        // An older transaction id predates the version's begin
        assert_eq!(t.get(4, &key), None);
    }

    #[test]
    fn test_old_version_readable_during_overwrite() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "old"));
        t.update(5, &key, |_| Some(row(1, "new"))).unwrap();
        // Writer sees its staged row, others the settled one
        assert_eq!(t.get(5, &key), Some(row(1, "new")));
        assert_eq!(t.get(3, &key), Some(row(1, "old")));
        t.settle(5, &key);
        assert_eq!(t.get(6, &key), Some(row(1, "new")));
        assert_eq!(t.get(4, &key), Some(row(1, "old")));
    }

    #[test]
    fn test_tombstone_reads_as_absent() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        assert!(t.delete(2, &key).unwrap());
        t.settle(2, &key);
        assert_eq!(t.get(3, &key), None);
        // The pre-delete version is still visible to the past
        assert_eq!(t.get(1, &key), Some(row(1, "a")));
    }

    // === Conflicts ===

    #[test]
    fn test_write_locked_row_conflicts() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        t.update(5, &key, |_| Some(row(1, "b"))).unwrap();
        let err = t.update(6, &key, |_| Some(row(1, "c"))).unwrap_err();
        assert!(err.is_conflict());
        let err = t.delete(6, &key).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_newer_reader_blocks_older_writer() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        // txn 9 reads; txn 5 then tries to write
        assert!(t.get(9, &key).is_some());
        let err = t.update(5, &key, |_| Some(row(1, "b"))).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_newer_committed_version_blocks_older_writer() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        t.update(9, &key, |_| Some(row(1, "b"))).unwrap();
        t.settle(9, &key);
        let err = t.update(5, &key, |_| Some(row(1, "c"))).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_own_rewrite_is_not_a_conflict() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        assert!(t.update(5, &key, |_| Some(row(1, "b"))).unwrap());
        assert!(t.update(5, &key, |_| Some(row(1, "c"))).unwrap());
        t.settle(5, &key);
        assert_eq!(t.get(6, &key), Some(row(1, "c")));
    }

    // === Insert rules ===

    #[test]
    fn test_add_duplicate_live_key_is_uniqueness_violation() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        let err = t.add(2, key, row(1, "b")).unwrap_err();
        assert!(matches!(err, Error::UniquenessViolation { .. }));
    }

    #[test]
    fn test_add_over_committed_tombstone_resurrects() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        t.delete(2, &key).unwrap();
        t.settle(2, &key);
        t.add(3, key.clone(), row(1, "again")).unwrap();
        t.settle(3, &key);
        assert_eq!(t.get(4, &key), Some(row(1, "again")));
    }

    #[test]
    fn test_add_over_own_staged_delete() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        t.delete(5, &key).unwrap();
        t.add(5, key.clone(), row(1, "b")).unwrap();
        t.settle(5, &key);
        assert_eq!(t.get(6, &key), Some(row(1, "b")));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        assert!(t.delete(2, &key).unwrap());
        assert!(!t.delete(2, &key).unwrap());
        t.settle(2, &key);
        assert!(!t.delete(3, &key).unwrap());
        assert!(!t.delete(3, &Key::Int(99)).unwrap());
    }

    // === Auto increment / key preparation ===

    #[test]
    fn test_auto_increment_assigns_and_injects() {
        let mut t = table("++id");
        let mut r = Value::record([("name", Value::from("a"))]);
        let key = t.prepare_insert(&mut r, None).unwrap();
        assert_eq!(key, Key::Int(1));
        assert_eq!(r.field("id"), Some(&Value::Int(1)));
        let mut r2 = Value::record([("name", Value::from("b"))]);
        assert_eq!(t.prepare_insert(&mut r2, None).unwrap(), Key::Int(2));
    }

    #[test]
    fn test_auto_increment_respects_explicit_keys() {
        let mut t = table("++id");
        let mut r = row(10, "a");
        assert_eq!(t.prepare_insert(&mut r, None).unwrap(), Key::Int(10));
        let mut r2 = Value::record([("name", Value::from("b"))]);
        assert_eq!(t.prepare_insert(&mut r2, None).unwrap(), Key::Int(11));
    }

    #[test]
    fn test_intrinsic_without_key_fails() {
        let mut t = table("id");
        let mut r = Value::record([("name", Value::from("a"))]);
        let err = t.prepare_insert(&mut r, None).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::MissingKeyPath { .. })
        ));
    }

    #[test]
    fn test_extrinsic_requires_supplied_key() {
        let mut t = table("");
        let mut r = Value::record([("name", Value::from("a"))]);
        assert!(t.prepare_insert(&mut r, None).is_err());
        let key = t
            .prepare_insert(&mut r, Some(Key::Text("k".into())))
            .unwrap();
        assert_eq!(key, Key::Text("k".into()));
    }

    // === Unique secondary indices ===

    #[test]
    fn test_unique_secondary_violation() {
        let mut t = table("id, &email");
        let email_row = |id: i64, email: &str| {
            Value::record([("id", Value::Int(id)), ("email", email.into())])
        };
        add_settled(&mut t, 1, email_row(1, "x"));
        let err = t.add(2, Key::Int(2), email_row(2, "x")).unwrap_err();
        assert!(matches!(err, Error::UniquenessViolation { .. }));
        // First row intact and visible
        assert_eq!(t.get(3, &Key::Int(1)), Some(email_row(1, "x")));
        // A different email is fine
        t.add(3, Key::Int(2), email_row(2, "y")).unwrap();
    }

    #[test]
    fn test_unique_check_ignores_stale_entries() {
        let mut t = table("id, &email");
        let email_row = |id: i64, email: &str| {
            Value::record([("id", Value::Int(id)), ("email", email.into())])
        };
        let key = add_settled(&mut t, 1, email_row(1, "x"));
        // Move row 1 off "x"; the old index entry lingers until GC
        t.update(2, &key, |_| Some(email_row(1, "z"))).unwrap();
        t.settle(2, &key);
        // "x" is free again for a different row
        t.add(3, Key::Int(2), email_row(2, "x")).unwrap();
    }

    #[test]
    fn test_unique_check_excludes_self() {
        let mut t = table("id, &email");
        let email_row = |id: i64, email: &str| {
            Value::record([("id", Value::Int(id)), ("email", email.into())])
        };
        let key = add_settled(&mut t, 1, email_row(1, "x"));
        // Rewriting the same row with the same email must not self-collide
        assert!(t.update(2, &key, |_| Some(email_row(1, "x"))).unwrap());
    }

    // === Intrinsic primary key change ===

    #[test]
    fn test_update_changing_primary_key() {
        let mut t = table("id, kind");
        let kind_row = |id: i64, kind: &str| {
            Value::record([("id", Value::Int(id)), ("kind", kind.into())])
        };
        let key = add_settled(&mut t, 1, kind_row(1, "a"));
        assert!(t.update(2, &key, |_| Some(kind_row(2, "a"))).unwrap());
        t.settle(2, &key);
        t.settle(2, &Key::Int(2));
        assert_eq!(t.get(3, &Key::Int(1)), None);
        assert_eq!(t.get(3, &Key::Int(2)), Some(kind_row(2, "a")));
    }

    #[test]
    fn test_key_change_onto_live_row_reverts_tombstone() {
        let mut t = table("id, kind");
        let kind_row = |id: i64, kind: &str| {
            Value::record([("id", Value::Int(id)), ("kind", kind.into())])
        };
        add_settled(&mut t, 1, kind_row(1, "a"));
        add_settled(&mut t, 1, kind_row(2, "b"));
        let err = t
            .update(2, &Key::Int(1), |_| Some(kind_row(2, "moved")))
            .unwrap_err();
        assert!(matches!(err, Error::UniquenessViolation { .. }));
        // The would-be tombstone was revoked: row 1 still reads live for tid 2
        assert_eq!(t.get(2, &Key::Int(1)), Some(kind_row(1, "a")));
        assert_eq!(t.get(2, &Key::Int(2)), Some(kind_row(2, "b")));
    }

    // === Revoke ===

    #[test]
    fn test_revoke_fresh_insert_removes_row() {
        let mut t = table("id, kind");
        let mut r = Value::record([("id", Value::Int(1)), ("kind", Value::from("a"))]);
        let key = t.prepare_insert(&mut r, None).unwrap();
        t.add(5, key.clone(), r).unwrap();
        t.revoke(5, &key);
        assert_eq!(t.get(5, &key), None);
        assert_eq!(t.raw_len(), 0);
        // The index entry went with it
        let hits = t
            .select(
                6,
                &IndexRef::parse("kind").unwrap(),
                &Matcher::Equals(Key::Text("a".into())),
            )
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_revoke_staged_update_restores_old_version() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        t.update(5, &key, |_| Some(row(1, "b"))).unwrap();
        t.revoke(5, &key);
        assert_eq!(t.get(5, &key), Some(row(1, "a")));
        assert_eq!(t.get(6, &key), Some(row(1, "a")));
    }

    #[test]
    fn test_revoke_keeps_shared_index_keys() {
        let mut t = table("id, kind");
        let kind_row = |id: i64, kind: &str| {
            Value::record([("id", Value::Int(id)), ("kind", kind.into())])
        };
        let key = add_settled(&mut t, 1, kind_row(1, "same"));
        // Staged rewrite with the same secondary key, then revoked
        t.update(5, &key, |_| Some(kind_row(1, "same"))).unwrap();
        t.revoke(5, &key);
        let hits = t
            .select(
                6,
                &IndexRef::parse("kind").unwrap(),
                &Matcher::Equals(Key::Text("same".into())),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    // === Garbage collection ===

    #[test]
    fn test_gc_trims_superseded_versions() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        t.update(5, &key, |_| Some(row(1, "b"))).unwrap();
        t.settle(5, &key);
        // The old version's lifetime ended at 5
        t.gc(5, &[key.clone()]);
        assert_eq!(t.get(6, &key), Some(row(1, "b")));
        // The superseded version is gone: nothing to see in the past
        assert_eq!(t.get(3, &key), None);
        assert_eq!(t.raw_len(), 1);
    }

    #[test]
    fn test_gc_drops_tombstoned_rows() {
        let mut t = table("id, kind");
        let kind_row = |id: i64, kind: &str| {
            Value::record([("id", Value::Int(id)), ("kind", kind.into())])
        };
        let key = add_settled(&mut t, 1, kind_row(1, "a"));
        t.delete(5, &key).unwrap();
        t.settle(5, &key);
        t.gc(5, &[key.clone()]);
        assert_eq!(t.raw_len(), 0);
        // Secondary entries are gone too
        let hits = t
            .select(
                6,
                &IndexRef::parse("kind").unwrap(),
                &Matcher::Equals(Key::Text("a".into())),
            )
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_gc_keeps_locked_rows() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        t.delete(5, &key).unwrap();
        // Not yet settled: the tombstone is still write-locked
        t.gc(5, &[key.clone()]);
        assert!(t.raw_len() == 1);
        assert_eq!(t.get(3, &key), Some(row(1, "a")));
    }

    #[test]
    fn test_gc_keeps_shared_index_keys_of_kept_versions() {
        let mut t = table("id, kind");
        let kind_row = |id: i64, kind: &str| {
            Value::record([("id", Value::Int(id)), ("kind", kind.into())])
        };
        let key = add_settled(&mut t, 1, kind_row(1, "same"));
        t.update(5, &key, |_| Some(kind_row(1, "same"))).unwrap();
        t.settle(5, &key);
        t.gc(5, &[key.clone()]);
        let hits = t
            .select(
                6,
                &IndexRef::parse("kind").unwrap(),
                &Matcher::Equals(Key::Text("same".into())),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    // === Iteration and matching ===

    #[test]
    fn test_entries_ascending_and_visibility_filtered() {
        let mut t = table("id");
        add_settled(&mut t, 1, row(2, "b"));
        add_settled(&mut t, 1, row(1, "a"));
        let mut r = row(3, "c");
        let k3 = t.prepare_insert(&mut r, None).unwrap();
        t.add(7, k3, r).unwrap(); // uncommitted, invisible to 5
        let listed = t.entries(5);
        assert_eq!(
            listed.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
            vec![Key::Int(1), Key::Int(2)]
        );
    }

    #[test]
    fn test_entries_read_marks_block_older_writers() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "a"));
        let _ = t.entries(9);
        let err = t.update(5, &key, |_| Some(row(1, "b"))).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_select_primary_range() {
        let mut t = table("id");
        for id in 1..=5 {
            add_settled(&mut t, 1, row(id, "x"));
        }
        let hits = t
            .select(
                2,
                &IndexRef::parse(":id").unwrap(),
                &Matcher::Range(KeyRange::between(Key::Int(2), Key::Int(4), true, true)),
            )
            .unwrap();
        assert_eq!(
            hits.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
            vec![Key::Int(2), Key::Int(3), Key::Int(4)]
        );
    }

    #[test]
    fn test_select_secondary_equals() {
        let mut t = table("id, kind");
        let kind_row = |id: i64, kind: &str| {
            Value::record([("id", Value::Int(id)), ("kind", kind.into())])
        };
        add_settled(&mut t, 1, kind_row(1, "a"));
        add_settled(&mut t, 1, kind_row(2, "b"));
        add_settled(&mut t, 1, kind_row(3, "a"));
        let hits = t
            .select(
                2,
                &IndexRef::parse("kind").unwrap(),
                &Matcher::Equals(Key::Text("a".into())),
            )
            .unwrap();
        assert_eq!(
            hits.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
            vec![Key::Int(1), Key::Int(3)]
        );
    }

    #[test]
    fn test_select_secondary_revalidates_visibility() {
        let mut t = table("id, kind");
        let kind_row = |id: i64, kind: &str| {
            Value::record([("id", Value::Int(id)), ("kind", kind.into())])
        };
        let key = add_settled(&mut t, 1, kind_row(1, "a"));
        // Stale entry: row moved from "a" to "b" but "a" entry remains
        t.update(3, &key, |_| Some(kind_row(1, "b"))).unwrap();
        t.settle(3, &key);
        let stale = t
            .select(
                4,
                &IndexRef::parse("kind").unwrap(),
                &Matcher::Equals(Key::Text("a".into())),
            )
            .unwrap();
        assert!(stale.is_empty());
        // The old state is still correct for an old reader
        let old = t
            .select(
                2,
                &IndexRef::parse("kind").unwrap(),
                &Matcher::Equals(Key::Text("a".into())),
            )
            .unwrap();
        assert_eq!(old.len(), 1);
    }

    #[test]
    fn test_select_multi_entry_dedupes_rows() {
        let mut t = table("id, *tags");
        let tag_row = |id: i64, tags: &[&str]| {
            Value::record([
                ("id", Value::Int(id)),
                (
                    "tags",
                    Value::List(tags.iter().map(|t| Value::from(*t)).collect()),
                ),
            ])
        };
        add_settled(&mut t, 1, tag_row(1, &["x", "y"]));
        add_settled(&mut t, 1, tag_row(2, &["y"]));
        let hits = t
            .select(
                2,
                &IndexRef::parse("tags").unwrap(),
                &Matcher::Range(KeyRange::all()),
            )
            .unwrap();
        // Row 1 matches under both "x" and "y" but is reported once
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_select_compound_prefix() {
        let mut t = table("id, [last+first]");
        let name_row = |id: i64, last: &str, first: &str| {
            Value::record([
                ("id", Value::Int(id)),
                ("last", last.into()),
                ("first", first.into()),
            ])
        };
        add_settled(&mut t, 1, name_row(1, "doe", "jane"));
        add_settled(&mut t, 1, name_row(2, "doe", "john"));
        add_settled(&mut t, 1, name_row(3, "roe", "ada"));
        let hits = t
            .select(
                2,
                &IndexRef::parse("last").unwrap(),
                &Matcher::Equals(Key::Text("doe".into())),
            )
            .unwrap();
        assert_eq!(hits.len(), 2);
        let full = t
            .select(
                2,
                &IndexRef::parse("[last+first]").unwrap(),
                &Matcher::Equals(Key::List(vec![
                    Key::Text("doe".into()),
                    Key::Text("john".into()),
                ])),
            )
            .unwrap();
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].0, Key::Int(2));
    }

    #[test]
    fn test_select_unknown_index_fails() {
        let mut t = table("id");
        let err = t
            .select(
                1,
                &IndexRef::parse("nope").unwrap(),
                &Matcher::Equals(Key::Int(1)),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::UnknownIndex { .. })
        ));
    }

    // === Snapshot stream ===

    #[test]
    fn test_snapshot_is_stable_under_later_writes() {
        let mut t = table("id");
        add_settled(&mut t, 1, row(1, "a"));
        add_settled(&mut t, 2, row(2, "b"));
        let snap = t.snapshot(2);
        // Later mutation does not affect the captured view
        add_settled(&mut t, 3, row(3, "c"));
        t.update(4, &Key::Int(1), |_| Some(row(1, "z"))).unwrap();
        t.settle(4, &Key::Int(1));
        let rows: Vec<(Key, Value)> = snap.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        assert_eq!(rows, vec![(Key::Int(1), row(1, "a")), (Key::Int(2), row(2, "b"))]);
        assert_eq!(snap.live_count(), 2);
    }

    #[test]
    fn test_snapshot_excludes_uncommitted() {
        let mut t = table("id");
        add_settled(&mut t, 1, row(1, "a"));
        let mut r = row(2, "b");
        let k = t.prepare_insert(&mut r, None).unwrap();
        t.add(5, k, r).unwrap();
        let snap = t.snapshot(9);
        assert_eq!(snap.live_count(), 1);
    }

    #[test]
    fn test_snapshot_at_writers_own_id_excludes_staged_write() {
        let mut t = table("id");
        let key = add_settled(&mut t, 1, row(1, "committed"));
        // Txn 5 stages an update and an insert; the snapshot id equals 5
        t.update(5, &key, |_| Some(row(1, "staged"))).unwrap();
        let mut fresh = row(2, "staged insert");
        let k2 = t.prepare_insert(&mut fresh, None).unwrap();
        t.add(5, k2, fresh).unwrap();
        let snap = t.snapshot(5);
        let rows: Vec<(Key, Value)> = snap.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        // Only the committed pre-image is durable; the staged insert is
        // absent entirely
        assert_eq!(rows, vec![(Key::Int(1), row(1, "committed"))]);
        // Once settled, the same id sees the committed result
        t.settle(5, &key);
        t.settle(5, &Key::Int(2));
        let snap = t.snapshot(5);
        assert_eq!(snap.live_count(), 2);
    }

    // === Recovery installation ===

    #[test]
    fn test_apply_recovered_installs_and_indexes() {
        let mut t = table("id, kind");
        let kind_row = |id: i64, kind: &str| {
            Value::record([("id", Value::Int(id)), ("kind", kind.into())])
        };
        t.apply_recovered(Key::Int(1), Some(kind_row(1, "a")));
        assert_eq!(t.get(1, &Key::Int(1)), Some(kind_row(1, "a")));
        let hits = t
            .select(
                1,
                &IndexRef::parse("kind").unwrap(),
                &Matcher::Equals(Key::Text("a".into())),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        // Replay of a tombstone removes row and index entries
        t.apply_recovered(Key::Int(1), None);
        assert_eq!(t.get(1, &Key::Int(1)), None);
        assert_eq!(t.raw_len(), 0);
    }

    #[test]
    fn test_apply_recovered_feeds_auto_increment() {
        let mut t = table("++id");
        t.apply_recovered(Key::Int(41), Some(row(41, "a")));
        let mut r = Value::record([("name", Value::from("b"))]);
        assert_eq!(t.prepare_insert(&mut r, None).unwrap(), Key::Int(42));
    }
}
