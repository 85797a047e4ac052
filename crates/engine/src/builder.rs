//! Database builder
//!
//! Databases are declared before they exist: schema versions accumulate on
//! the builder, and `build()` freezes them, recovers persisted state from
//! the host KV, and hands back a live [`Database`]. There is no way to
//! declare anything afterwards; the builder is consumed.

use crate::background::SaverSignal;
use crate::database::{Database, Shared, State};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{Error, HostKv, Limits, Result};
use tessera_durability::{DurabilityManager, LoadOutcome};
use tessera_schema::SchemaRegistry;
use tessera_store::{TableStore, TransactionManager};
use tracing::{info, warn};

/// Accumulates declarations for one database.
pub struct DatabaseBuilder {
    name: String,
    kv: Arc<dyn HostKv>,
    limits: Limits,
    registry: SchemaRegistry,
    auto_save: bool,
}

impl std::fmt::Debug for DatabaseBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBuilder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DatabaseBuilder {
    /// Start declaring a database stored in `kv` under `name`.
    pub fn new(name: impl Into<String>, kv: Arc<dyn HostKv>) -> Self {
        DatabaseBuilder {
            name: name.into(),
            kv,
            limits: Limits::default(),
            registry: SchemaRegistry::new(),
            auto_save: true,
        }
    }

    /// Override size limits (defaults match the common host cap).
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Disable the background saver: snapshots are written only on
    /// explicit `flush()`/`close()`. Commits still reach the WAL, so
    /// durability is unaffected, only snapshot compaction timing changes.
    pub fn manual_save(mut self) -> Self {
        self.auto_save = false;
        self
    }

    /// Declare one schema version from `(table, spec)` pairs.
    ///
    /// # Errors
    ///
    /// Fails immediately on an invalid schema string or a repeated
    /// version number, so mistakes surface at declaration site.
    pub fn version<'a, I>(mut self, number: u32, tables: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.registry.declare(number, tables)?;
        Ok(self)
    }

    /// Freeze the schema, recover persisted state, start the saver.
    ///
    /// # Errors
    ///
    /// Fails when no version was declared, or when the host KV holds data
    /// written under a schema version other than the newest declared one
    /// (no upgrade machinery is carried; see the schema registry docs).
    pub fn build(self) -> Result<Database> {
        let (newest_version, schemas) = self.registry.newest()?;
        let schemas = schemas.clone();

        let mut tables: Vec<TableStore> = Vec::with_capacity(schemas.len());
        let mut by_name: BTreeMap<String, usize> = BTreeMap::new();
        for (table_id, schema) in &schemas {
            by_name.insert(table_id.clone(), tables.len());
            tables.push(TableStore::new(table_id.clone(), schema.clone()));
        }

        let (mut durability, outcome) =
            DurabilityManager::open(Arc::clone(&self.kv), self.name.clone(), self.limits);

        let txns = match outcome {
            LoadOutcome::Fresh => {
                durability.set_schema_versions(newest_version, self.registry.version_numbers());
                info!(db = %self.name, version = newest_version, "initialized empty database");
                TransactionManager::new()
            }
            LoadOutcome::Recovered(state) => {
                if let Err(e) = self.registry.check_loadable(state.schema_version) {
                    return Err(Error::CorruptMetadata {
                        db: self.name.clone(),
                        reason: e.to_string(),
                    });
                }
                for (table_id, rows) in state.tables {
                    let Some(&idx) = by_name.get(&table_id) else {
                        warn!(db = %self.name, table = %table_id, "snapshot names an undeclared table, dropping its rows");
                        continue;
                    };
                    for (key, object) in rows {
                        tables[idx].apply_recovered(key, Some(object));
                    }
                }
                let mut replayed = 0usize;
                for entry in state.wal {
                    for mutation in entry.mutations {
                        let Some(&idx) = by_name.get(&mutation.table) else {
                            warn!(db = %self.name, table = %mutation.table, "WAL names an undeclared table, dropping the mutation");
                            continue;
                        };
                        tables[idx].apply_recovered(mutation.key, mutation.object);
                        replayed += 1;
                    }
                }
                info!(
                    db = %self.name,
                    version = state.schema_version,
                    replayed,
                    "database recovered"
                );
                TransactionManager::starting_at(state.next_txn)
            }
        };

        let shared = Arc::new(Shared {
            name: self.name,
            state: Mutex::new(State {
                tables,
                by_name,
                txns,
                durability,
            }),
            saver: SaverSignal::default(),
            save_serial: Mutex::new(()),
            auto_save: self.auto_save,
        });
        Ok(Database::start(shared))
    }
}
