//! Versioned schema registry
//!
//! Applications declare schema versions by ascending integer before the
//! database is built; the newest version is the live schema. Versions are
//! parsed eagerly so every declaration error surfaces at build time, not at
//! first use.
//!
//! Loading rejects any stored version other than the newest declared one:
//! versions newer than this build cannot be interpreted, and no upgrade
//! machinery is carried for older ones.

use crate::descriptor::{parse_table_schema, TableSchema};
use std::collections::BTreeMap;
use tessera_core::SchemaError;
use tracing::debug;

/// The set of declared schema versions.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    versions: BTreeMap<u32, BTreeMap<String, TableSchema>>,
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Declare one version from `(table, spec)` pairs.
    ///
    /// # Errors
    ///
    /// Fails on a repeated version number, a repeated table within the
    /// version, or any invalid schema string.
    pub fn declare<'a, I>(&mut self, version: u32, tables: I) -> Result<(), SchemaError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if self.versions.contains_key(&version) {
            return Err(SchemaError::DuplicateVersion(version));
        }
        let mut parsed = BTreeMap::new();
        for (table, spec) in tables {
            let schema = parse_table_schema(table, spec)?;
            if parsed.insert(table.to_string(), schema).is_some() {
                return Err(SchemaError::DuplicateTable(table.to_string()));
            }
        }
        debug!(version, tables = parsed.len(), "schema version declared");
        self.versions.insert(version, parsed);
        Ok(())
    }

    /// Number of declared versions.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// True when nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// All declared version numbers, ascending.
    pub fn version_numbers(&self) -> Vec<u32> {
        self.versions.keys().copied().collect()
    }

    /// The newest declared version and its tables.
    pub fn newest(&self) -> Result<(u32, &BTreeMap<String, TableSchema>), SchemaError> {
        self.versions
            .iter()
            .next_back()
            .map(|(v, t)| (*v, t))
            .ok_or(SchemaError::NoVersions)
    }

    /// Verify that data stored under `stored` can be loaded by this build.
    pub fn check_loadable(&self, stored: u32) -> Result<(), SchemaError> {
        let (carried, _) = self.newest()?;
        if stored != carried {
            return Err(SchemaError::VersionMismatch { stored, carried });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_wins() {
        let mut reg = SchemaRegistry::new();
        reg.declare(1, [("players", "++id")]).unwrap();
        reg.declare(2, [("players", "++id, &email")]).unwrap();
        let (version, tables) = reg.newest().unwrap();
        assert_eq!(version, 2);
        assert_eq!(tables["players"].indices.len(), 1);
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let mut reg = SchemaRegistry::new();
        reg.declare(3, [("a", "")]).unwrap();
        reg.declare(1, [("a", ""), ("b", "")]).unwrap();
        assert_eq!(reg.newest().unwrap().0, 3);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let mut reg = SchemaRegistry::new();
        reg.declare(1, [("a", "")]).unwrap();
        assert_eq!(
            reg.declare(1, [("a", "")]),
            Err(SchemaError::DuplicateVersion(1))
        );
    }

    #[test]
    fn test_invalid_spec_surfaces_at_declare() {
        let mut reg = SchemaRegistry::new();
        assert!(matches!(
            reg.declare(1, [("t", "++id, *[a+b]")]),
            Err(SchemaError::CompoundMultiEntry { .. })
        ));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut reg = SchemaRegistry::new();
        assert_eq!(
            reg.declare(1, [("a", ""), ("a", "++id")]),
            Err(SchemaError::DuplicateTable("a".into()))
        );
    }

    #[test]
    fn test_empty_registry_has_no_newest() {
        let reg = SchemaRegistry::new();
        assert_eq!(reg.newest().unwrap_err(), SchemaError::NoVersions);
    }

    #[test]
    fn test_check_loadable() {
        let mut reg = SchemaRegistry::new();
        reg.declare(1, [("a", "")]).unwrap();
        reg.declare(2, [("a", "")]).unwrap();
        assert!(reg.check_loadable(2).is_ok());
        assert_eq!(
            reg.check_loadable(1),
            Err(SchemaError::VersionMismatch {
                stored: 1,
                carried: 2
            })
        );
        assert_eq!(
            reg.check_loadable(9),
            Err(SchemaError::VersionMismatch {
                stored: 9,
                carried: 2
            })
        );
    }
}
