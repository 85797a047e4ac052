//! Index descriptors and the table-schema grammar
//!
//! A table schema is one primary-key descriptor plus a set of secondary
//! indices, declared through the compact comma-separated grammar described
//! in the crate docs. `Display` renders a schema back into that grammar;
//! parse∘render is the identity on valid schemas.

use crate::keypath::KeyPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tessera_core::{Key, SchemaError, Value};

/// A secondary-index descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Key paths; more than one means a compound index.
    pub paths: Vec<KeyPath>,
    /// Reject two live rows sharing one indexed key.
    pub unique: bool,
    /// Extract one key per array element instead of one key per row.
    pub multi_entry: bool,
}

impl IndexDescriptor {
    /// True when the index combines several key paths.
    pub fn is_compound(&self) -> bool {
        self.paths.len() > 1
    }

    /// Canonical name: `a.b` for simple indices, `[a+b]` for compounds.
    pub fn name(&self) -> String {
        canonical_name(&self.paths)
    }

    /// Extract every indexed key for a row.
    ///
    /// A compound index yields at most one list key (absent when any
    /// component is missing); a multi-entry index yields one key per
    /// reached array element; a plain index yields at most one key.
    pub fn extract_keys(&self, row: &Value) -> Vec<Key> {
        if self.is_compound() {
            return self
                .paths
                .iter()
                .map(|p| p.extract(row))
                .collect::<Option<Vec<Key>>>()
                .map(Key::List)
                .into_iter()
                .collect();
        }
        if self.multi_entry {
            return self.paths[0].extract_multi(row);
        }
        self.paths[0].extract(row).into_iter().collect()
    }
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unique {
            write!(f, "&")?;
        }
        if self.multi_entry {
            write!(f, "*")?;
        }
        write!(f, "{}", self.name())
    }
}

/// The primary-key descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    /// Key paths; empty means the key is extrinsic (supplied on insert).
    pub paths: Vec<KeyPath>,
    /// Assign ascending integer keys to rows inserted without one.
    /// Only valid on a simple intrinsic key.
    pub auto_increment: bool,
}

impl PrimaryKey {
    /// True when the key is computed from the row's own fields.
    pub fn is_intrinsic(&self) -> bool {
        !self.paths.is_empty()
    }

    /// True when the key combines several key paths.
    pub fn is_compound(&self) -> bool {
        self.paths.len() > 1
    }

    /// Extract the primary key from a row.
    pub fn extract(&self, row: &Value) -> Option<Key> {
        match self.paths.len() {
            0 => None,
            1 => self.paths[0].extract(row),
            _ => self
                .paths
                .iter()
                .map(|p| p.extract(row))
                .collect::<Option<Vec<Key>>>()
                .map(Key::List),
        }
    }

    /// Canonical name of the index backing the primary key.
    pub fn name(&self) -> String {
        canonical_name(&self.paths)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.auto_increment {
            write!(f, "++")?;
        }
        write!(f, "{}", self.name())
    }
}

fn canonical_name(paths: &[KeyPath]) -> String {
    match paths.len() {
        0 => String::new(),
        1 => paths[0].to_string(),
        _ => {
            let joined: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
            format!("[{}]", joined.join("+"))
        }
    }
}

/// One table's schema: primary key plus secondary indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// The primary-key descriptor.
    pub primary: PrimaryKey,
    /// Secondary indices, in declaration order.
    pub indices: Vec<IndexDescriptor>,
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        for index in &self.indices {
            write!(f, ", {index}")?;
        }
        Ok(())
    }
}

/// Reference to an index, as used by queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRef {
    /// The primary key, written `:id`.
    Primary,
    /// One or more key paths, written `a.b` or `[a+b]`.
    Paths(Vec<KeyPath>),
}

/// The sentinel naming the primary index.
pub const PRIMARY_REF: &str = ":id";

impl IndexRef {
    /// Parse `:id`, a dotted path, or a bracketed compound list.
    pub fn parse(text: &str) -> Result<IndexRef, SchemaError> {
        let text = text.trim();
        if text == PRIMARY_REF {
            return Ok(IndexRef::Primary);
        }
        if text.starts_with('[') {
            return Ok(IndexRef::Paths(parse_bracket_paths(text)?));
        }
        Ok(IndexRef::Paths(vec![KeyPath::parse(text)?]))
    }

    /// Render back into the query syntax.
    pub fn display_name(&self) -> String {
        match self {
            IndexRef::Primary => PRIMARY_REF.to_string(),
            IndexRef::Paths(paths) => canonical_name(paths),
        }
    }
}

/// Which physical map serves a resolved index reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTarget {
    /// The primary-key row map.
    Primary,
    /// Secondary index at this position in [`TableSchema::indices`].
    Secondary(usize),
}

/// Result of resolving an [`IndexRef`] against a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSelection {
    /// Map to route through.
    pub target: IndexTarget,
    /// How many leading paths of the target the reference covers.
    pub prefix_len: usize,
    /// Total paths of the target index.
    pub total_len: usize,
}

impl IndexSelection {
    /// True when the reference covers the whole compound.
    pub fn is_full(&self) -> bool {
        self.prefix_len == self.total_len
    }
}

impl TableSchema {
    /// Resolve an index reference: exact matches win, then the first index
    /// the reference is a proper prefix of (primary first).
    pub fn resolve(&self, index_ref: &IndexRef) -> Option<IndexSelection> {
        let paths = match index_ref {
            IndexRef::Primary => {
                return Some(IndexSelection {
                    target: IndexTarget::Primary,
                    prefix_len: self.primary.paths.len().max(1),
                    total_len: self.primary.paths.len().max(1),
                });
            }
            IndexRef::Paths(paths) => paths,
        };

        let candidates = std::iter::once((IndexTarget::Primary, &self.primary.paths)).chain(
            self.indices
                .iter()
                .enumerate()
                .map(|(i, d)| (IndexTarget::Secondary(i), &d.paths)),
        );

        let mut prefix_hit = None;
        for (target, target_paths) in candidates {
            if target_paths.as_slice() == paths.as_slice() {
                return Some(IndexSelection {
                    target,
                    prefix_len: paths.len(),
                    total_len: target_paths.len(),
                });
            }
            if prefix_hit.is_none()
                && target_paths.len() > paths.len()
                && target_paths.starts_with(paths)
            {
                prefix_hit = Some(IndexSelection {
                    target,
                    prefix_len: paths.len(),
                    total_len: target_paths.len(),
                });
            }
        }
        prefix_hit
    }
}

/// Parse one table's schema string.
pub fn parse_table_schema(table: &str, spec: &str) -> Result<TableSchema, SchemaError> {
    let mut items = spec.split(',').map(str::trim);
    let primary_text = items.next().unwrap_or("");
    let primary = parse_primary(table, primary_text)?;

    let mut seen: BTreeSet<String> = BTreeSet::new();
    if primary.is_intrinsic() {
        seen.insert(primary.name());
    }

    let mut indices = Vec::new();
    for item in items {
        let index = parse_secondary(table, item)?;
        if !seen.insert(index.name()) {
            return Err(SchemaError::DuplicateIndex {
                table: table.to_string(),
                index: index.name(),
            });
        }
        indices.push(index);
    }

    Ok(TableSchema { primary, indices })
}

fn parse_primary(table: &str, text: &str) -> Result<PrimaryKey, SchemaError> {
    if text.is_empty() {
        return Ok(PrimaryKey {
            paths: Vec::new(),
            auto_increment: false,
        });
    }
    if let Some(rest) = text.strip_prefix("++") {
        if rest.is_empty() || rest.starts_with('[') {
            return Err(SchemaError::AutoIncrementNotSimple {
                table: table.to_string(),
            });
        }
        return Ok(PrimaryKey {
            paths: vec![KeyPath::parse(rest)?],
            auto_increment: true,
        });
    }
    if text.starts_with('[') {
        return Ok(PrimaryKey {
            paths: parse_bracket_paths_for(table, text)?,
            auto_increment: false,
        });
    }
    Ok(PrimaryKey {
        paths: vec![KeyPath::parse(text)?],
        auto_increment: false,
    })
}

fn parse_secondary(table: &str, text: &str) -> Result<IndexDescriptor, SchemaError> {
    let (unique, multi_entry, rest) = if let Some(r) = text.strip_prefix("&*") {
        (true, true, r)
    } else if let Some(r) = text.strip_prefix("*&") {
        (true, true, r)
    } else if let Some(r) = text.strip_prefix('&') {
        (true, false, r)
    } else if let Some(r) = text.strip_prefix('*') {
        (false, true, r)
    } else {
        (false, false, text)
    };

    if rest.starts_with("++") {
        return Err(SchemaError::AutoIncrementOnSecondary {
            table: table.to_string(),
        });
    }

    if rest.starts_with('[') {
        if multi_entry {
            return Err(SchemaError::CompoundMultiEntry {
                table: table.to_string(),
            });
        }
        return Ok(IndexDescriptor {
            paths: parse_bracket_paths_for(table, rest)?,
            unique,
            multi_entry: false,
        });
    }

    Ok(IndexDescriptor {
        paths: vec![KeyPath::parse(rest)?],
        unique,
        multi_entry,
    })
}

fn parse_bracket_paths_for(table: &str, text: &str) -> Result<Vec<KeyPath>, SchemaError> {
    let paths = parse_bracket_paths(text)?;
    if paths.len() < 2 {
        return Err(SchemaError::CompoundTooShort {
            table: table.to_string(),
        });
    }
    Ok(paths)
}

fn parse_bracket_paths(text: &str) -> Result<Vec<KeyPath>, SchemaError> {
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| SchemaError::InvalidKeyPath {
            path: text.to_string(),
            position: text.len().saturating_sub(1),
        })?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner.split('+').map(|p| KeyPath::parse(p.trim())).collect()
}
