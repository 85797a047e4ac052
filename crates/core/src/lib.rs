//! Core types for Tessera
//!
//! This crate defines the vocabulary shared by every layer:
//! - Value: the self-describing storable sum type rows are made of
//! - Key: typed composite keys with a fixed total order
//! - Error / SchemaError: the unified error taxonomy
//! - Limits: size configuration for the host slot surface
//! - HostKv: the constrained string-slot store the database persists into

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod host;
pub mod key;
pub mod limits;
pub mod value;

pub use error::{Error, Result, SchemaError, SlotError};
pub use host::{HostKv, MemoryKv};
pub use key::{Key, KeyRange};
pub use limits::Limits;
pub use value::Value;
