//! The constrained host key/value surface
//!
//! The database persists exclusively through this interface: named slots
//! holding size-limited character strings, where each individual set/delete
//! is atomic but writes do not compose. All crash-safety reasoning in the
//! durability layer rests on exactly these three operations.

use crate::error::SlotError;
use crate::limits::DEFAULT_MAX_SLOT_LEN;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// String-slot store the database persists into.
///
/// Implementations must make each `set` and `delete` individually atomic:
/// a reader (including a post-crash recovery) observes either the old or
/// the new value of a slot, never a mixture.
pub trait HostKv: Send + Sync {
    /// Read a slot. `None` if the slot was never set or was deleted.
    fn get(&self, name: &str) -> Option<String>;

    /// Atomically replace a slot's value.
    ///
    /// # Errors
    ///
    /// Fails if and only if `value` exceeds [`HostKv::max_slot_len`].
    fn set(&self, name: &str, value: &str) -> Result<(), SlotError>;

    /// Atomically remove a slot. Removing an absent slot is a no-op.
    fn delete(&self, name: &str);

    /// Per-slot character budget enforced by `set`.
    fn max_slot_len(&self) -> usize;
}

/// In-memory [`HostKv`] for embedding and tests.
#[derive(Debug)]
pub struct MemoryKv {
    slots: Mutex<BTreeMap<String, String>>,
    max_slot_len: usize,
}

impl MemoryKv {
    /// Create an empty store with the default slot capacity.
    pub fn new() -> Self {
        MemoryKv::with_max_slot_len(DEFAULT_MAX_SLOT_LEN)
    }

    /// Create an empty store with a custom slot capacity.
    pub fn with_max_slot_len(max_slot_len: usize) -> Self {
        MemoryKv {
            slots: Mutex::new(BTreeMap::new()),
            max_slot_len,
        }
    }

    /// Snapshot of all slot names, in order. Test support.
    pub fn names(&self) -> Vec<String> {
        self.slots.lock().keys().cloned().collect()
    }

    /// Deep copy of the current slot contents. Test support.
    pub fn dump(&self) -> BTreeMap<String, String> {
        self.slots.lock().clone()
    }

    /// Replace the entire slot contents. Test support (crash-state replay).
    pub fn restore(&self, slots: BTreeMap<String, String>) {
        *self.slots.lock() = slots;
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        MemoryKv::new()
    }
}

impl HostKv for MemoryKv {
    fn get(&self, name: &str) -> Option<String> {
        self.slots.lock().get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), SlotError> {
        let len = value.chars().count();
        if len > self.max_slot_len {
            return Err(SlotError::Oversize {
                len,
                max: self.max_slot_len,
            });
        }
        self.slots.lock().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, name: &str) {
        self.slots.lock().remove(name);
    }

    fn max_slot_len(&self) -> usize {
        self.max_slot_len
    }
}
