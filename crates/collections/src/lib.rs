//! Persistent ordered collections for Tessera
//!
//! A weight-balanced binary tree with reference-counted nodes. Every
//! operation is pure: it returns a new root and shares untouched subtrees
//! with the input. The MVCC engine depends on that structural sharing:
//! row maps, secondary indices and the transaction queue are all snapshotted
//! with an O(1) clone while mutation continues on the live root.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod map;
mod set;
pub(crate) mod tree;

pub use map::{Entries, OrdMap, RangeEntries};
pub use set::OrdSet;
