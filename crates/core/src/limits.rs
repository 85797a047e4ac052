//! Size configuration for the host slot surface
//!
//! The host KV stores character strings with a hard per-slot cap. Every
//! chunked artifact (WAL chunks, snapshot parts) is sized against
//! `max_slot_len`; metadata is kept far below it by construction.

use serde::{Deserialize, Serialize};

/// Default per-slot character budget.
///
/// Matches the common scripting-host dynamic-property limit the store was
/// designed against.
pub const DEFAULT_MAX_SLOT_LEN: usize = 32_767;

/// Tunable size limits, threaded through the database builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum characters the host accepts in a single slot value.
    pub max_slot_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_slot_len: DEFAULT_MAX_SLOT_LEN,
        }
    }
}

impl Limits {
    /// Limits with a custom slot capacity; useful in tests to force
    /// multi-chunk artifacts with small data sets.
    pub fn with_max_slot_len(max_slot_len: usize) -> Self {
        Limits { max_slot_len }
    }
}
