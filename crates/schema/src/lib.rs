//! Schema layer for Tessera
//!
//! Tables are declared with a compact per-table grammar:
//!
//! - `++id`: intrinsic auto-incremented primary key (non-compound only)
//! - `id`: intrinsic primary key
//! - `` (empty): extrinsic primary key, supplied on insert
//! - `[a+b]`: compound key (primary or secondary), at least two paths
//! - `&email`: unique secondary; `*tags`: multi-entry secondary;
//!   `&*code` / `*&code`: both
//!
//! Secondaries follow the primary in a comma-separated list, e.g.
//! `"++id, name, &email, *tags, [group+rank]"`.
//!
//! This parser is the one user-facing validation surface; it reports
//! structured [`SchemaError`](tessera_core::SchemaError)s rather than
//! best-effort strings.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod descriptor;
pub mod keypath;
pub mod registry;

pub use descriptor::{
    parse_table_schema, IndexDescriptor, IndexRef, IndexSelection, IndexTarget, PrimaryKey,
    TableSchema,
};
pub use keypath::KeyPath;
pub use registry::SchemaRegistry;
