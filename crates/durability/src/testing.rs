//! Test support: a journaling host KV
//!
//! `JournalKv` wraps [`MemoryKv`] and records a full copy of the slot
//! contents after every successful write. Crash-closure tests replay the
//! protocol once, then recover from every recorded intermediate state;
//! each one is exactly what a crash immediately after that host-KV write
//! would leave behind.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{HostKv, MemoryKv, SlotError};

/// A [`HostKv`] that journals every post-write state.
pub struct JournalKv {
    inner: MemoryKv,
    history: Mutex<Vec<BTreeMap<String, String>>>,
}

impl JournalKv {
    /// Empty store with the given slot capacity.
    pub fn with_max_slot_len(max_slot_len: usize) -> Arc<Self> {
        Arc::new(JournalKv {
            inner: MemoryKv::with_max_slot_len(max_slot_len),
            history: Mutex::new(Vec::new()),
        })
    }

    /// Empty store with the default capacity.
    pub fn new() -> Arc<Self> {
        Self::with_max_slot_len(tessera_core::limits::DEFAULT_MAX_SLOT_LEN)
    }

    /// Number of recorded states.
    pub fn state_count(&self) -> usize {
        self.history.lock().len()
    }

    /// All recorded post-write states, oldest first.
    pub fn states(&self) -> Vec<BTreeMap<String, String>> {
        self.history.lock().clone()
    }

    /// The live slot contents.
    pub fn current_state(&self) -> BTreeMap<String, String> {
        self.inner.dump()
    }

    /// Forget recorded history (keeps the live contents).
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Build a fresh [`MemoryKv`] holding one recorded state.
    pub fn rewind_to(state: &BTreeMap<String, String>, max_slot_len: usize) -> Arc<MemoryKv> {
        let kv = MemoryKv::with_max_slot_len(max_slot_len);
        kv.restore(state.clone());
        Arc::new(kv)
    }

    fn journal(&self) {
        self.history.lock().push(self.inner.dump());
    }
}

impl HostKv for JournalKv {
    fn get(&self, name: &str) -> Option<String> {
        self.inner.get(name)
    }

    fn set(&self, name: &str, value: &str) -> Result<(), SlotError> {
        self.inner.set(name, value)?;
        self.journal();
        Ok(())
    }

    fn delete(&self, name: &str) {
        self.inner.delete(name);
        self.journal();
    }

    fn max_slot_len(&self) -> usize {
        self.inner.max_slot_len()
    }
}
