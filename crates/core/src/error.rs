//! Error types for the Tessera database
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! Three policies apply to these errors:
//!
//! - `WriteConflict` is retried internally: the transaction framework aborts
//!   and re-runs the transaction body with a fresh id. Callers never see it
//!   unless they inspect errors inside the body.
//! - `UniquenessViolation`, `Schema` and `CorruptMetadata` surface to the
//!   caller after the transaction aborts.
//! - Oversized WAL entries, corrupt chunks and partial snapshot parts are
//!   operator-visible warnings handled in the durability layer, not errors.

use crate::key::Key;
use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the Tessera database
#[derive(Debug, Error)]
pub enum Error {
    /// A write raced with a newer reader or writer on the same row.
    ///
    /// This error drives the transaction retry loop and is not normally
    /// observed by callers.
    #[error("write conflict on table '{table}' key {key:?}")]
    WriteConflict {
        /// Table the conflicting row belongs to
        table: String,
        /// Primary key of the conflicting row
        key: Key,
    },

    /// A write would create two live rows under the same primary or
    /// unique-secondary key.
    #[error("uniqueness violation on table '{table}' index '{index}' key {key:?}")]
    UniquenessViolation {
        /// Table the write targeted
        table: String,
        /// Violated index (`:id` for the primary key)
        index: String,
        /// The duplicated key
        key: Key,
    },

    /// Invalid schema string, unknown key path, or unusable index reference.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Stored metadata could not be used.
    ///
    /// Recovery reinitializes empty on an unreadable blob; this error is
    /// raised only when the metadata is readable but names a schema version
    /// this build does not carry.
    #[error("corrupt metadata for database '{db}': {reason}")]
    CorruptMetadata {
        /// Database name
        db: String,
        /// What made the metadata unusable
        reason: String,
    },

    /// Payload serialization or deserialization failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The host KV rejected a slot write.
    #[error(transparent)]
    Slot(#[from] SlotError),

    /// The named table is not part of the schema.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// An operation was attempted in a state that does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Check if this error is a write conflict.
    ///
    /// Used by the retry loop: only conflicts are retried, everything else
    /// propagates after abort.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::WriteConflict { .. })
    }
}

/// Schema-validation errors
///
/// These are produced by the schema-string parser and by index-reference
/// resolution; they are the one user-facing validation surface and therefore
/// carry structured positions where applicable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// `[]` or `[a]`: a compound index needs at least two key paths
    #[error("compound index in table '{table}' needs at least two key paths")]
    CompoundTooShort {
        /// Table being declared
        table: String,
    },

    /// `*[a+b]`: multi-entry extraction is not representable over compounds
    #[error("compound index in table '{table}' cannot be multi-entry")]
    CompoundMultiEntry {
        /// Table being declared
        table: String,
    },

    /// `++` applied to a secondary index
    #[error("auto-increment is only valid on the primary key of table '{table}'")]
    AutoIncrementOnSecondary {
        /// Table being declared
        table: String,
    },

    /// `++[a+b]` or bare `++`: auto-increment needs a single intrinsic path
    #[error("auto-increment primary key of table '{table}' must be a single key path")]
    AutoIncrementNotSimple {
        /// Table being declared
        table: String,
    },

    /// A key path failed to parse
    #[error("invalid key path '{path}' at character {position}")]
    InvalidKeyPath {
        /// The offending path text
        path: String,
        /// Byte offset of the first bad character
        position: usize,
    },

    /// The same index appears twice in one table declaration
    #[error("duplicate index '{index}' in table '{table}'")]
    DuplicateIndex {
        /// Table being declared
        table: String,
        /// Canonical name of the repeated index
        index: String,
    },

    /// A row carried no key-typed value at an intrinsic key path
    #[error("row for table '{table}' has no usable key at '{path}'")]
    MissingKeyPath {
        /// Table the row was written to
        table: String,
        /// The key path that failed to extract
        path: String,
    },

    /// A query referenced an index the table does not declare
    #[error("table '{table}' has no index '{index}'")]
    UnknownIndex {
        /// Table queried
        table: String,
        /// Requested index reference
        index: String,
    },

    /// No schema versions were declared before build
    #[error("no schema versions declared")]
    NoVersions,

    /// The same version number was declared twice
    #[error("schema version {0} declared twice")]
    DuplicateVersion(u32),

    /// The same table appears twice within one version declaration
    #[error("table '{0}' declared twice in one version")]
    DuplicateTable(String),

    /// Stored data was written under a schema version this build cannot load
    #[error("stored schema version {stored} is not loadable (this build carries version {carried})")]
    VersionMismatch {
        /// Version found in metadata
        stored: u32,
        /// Newest version declared by the application
        carried: u32,
    },
}

/// Host-KV slot errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    /// The value exceeds the host's per-slot character budget
    #[error("slot value of {len} chars exceeds capacity {max}")]
    Oversize {
        /// Characters in the rejected value
        len: usize,
        /// Host per-slot capacity
        max: usize,
    },
}
