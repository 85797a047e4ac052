//! Key paths: dotted field chains into a row
//!
//! A key path is `ident(.ident)*` where `ident` is an identifier-start
//! character (`_`, `$`, or alphabetic) followed by identifier-continues
//! (those plus digits). Extraction walks the row's nested maps; the
//! multi-entry variant additionally descends into arrays at every level and
//! yields one key per reached element.

use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_core::{Key, SchemaError, Value};

/// A parsed dotted field chain, e.g. `address.city`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPath {
    segments: Vec<String>,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    is_ident_start(c) || c.is_numeric()
}

impl KeyPath {
    /// Parse a dotted path, reporting the byte offset of the first bad
    /// character on failure.
    pub fn parse(text: &str) -> Result<KeyPath, SchemaError> {
        let bad = |position: usize| SchemaError::InvalidKeyPath {
            path: text.to_string(),
            position,
        };
        if text.is_empty() {
            return Err(bad(0));
        }
        let mut segments = Vec::new();
        let mut start = 0usize;
        let mut expect_start = true;
        for (offset, c) in text.char_indices() {
            if expect_start {
                if !is_ident_start(c) {
                    return Err(bad(offset));
                }
                expect_start = false;
            } else if c == '.' {
                segments.push(text[start..offset].to_string());
                start = offset + 1;
                expect_start = true;
            } else if !is_ident_continue(c) {
                return Err(bad(offset));
            }
        }
        if expect_start {
            // Trailing dot: the missing segment starts past the end.
            return Err(bad(text.len()));
        }
        segments.push(text[start..].to_string());
        Ok(KeyPath { segments })
    }

    /// Path segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Name of the first segment; used when injecting auto-increment keys.
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    /// True for single-segment paths.
    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1
    }

    /// Extract the key this path denotes from a row, if present and
    /// key-typed.
    pub fn extract(&self, row: &Value) -> Option<Key> {
        let mut cursor = row;
        for segment in &self.segments {
            cursor = cursor.field(segment)?;
        }
        Key::from_value(cursor)
    }

    /// Multi-entry extraction: descend into arrays at every level and
    /// collect one key per reached leaf.
    ///
    /// Duplicates are preserved; index maintenance is idempotent per key.
    pub fn extract_multi(&self, row: &Value) -> Vec<Key> {
        let mut keys = Vec::new();
        collect_multi(row, &self.segments, &mut keys);
        keys
    }
}

fn collect_multi(value: &Value, segments: &[String], keys: &mut Vec<Key>) {
    if let Value::List(items) = value {
        for item in items {
            collect_multi(item, segments, keys);
        }
        return;
    }
    match segments.split_first() {
        None => {
            if let Some(key) = Key::from_value(value) {
                keys.push(key);
            }
        }
        Some((head, rest)) => {
            if let Some(inner) = value.field(head) {
                collect_multi(inner, rest, keys);
            }
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}
