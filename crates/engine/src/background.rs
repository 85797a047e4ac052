//! Background saver thread
//!
//! One worker per database drains save requests: commits mark the signal
//! dirty and notify; the worker coalesces bursts into single saves. The
//! save itself is single-flight; a dedicated mutex serializes it against
//! explicit `flush()` calls.

use crate::database::{save_once, Shared};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

#[derive(Default)]
struct SaverFlags {
    dirty: bool,
    shutdown: bool,
}

/// Wake-up channel between committers and the saver thread.
#[derive(Default)]
pub(crate) struct SaverSignal {
    flags: Mutex<SaverFlags>,
    work_ready: Condvar,
}

pub(crate) enum Work {
    Save,
    Shutdown,
}

impl SaverSignal {
    /// Ask for a save soon. Cheap and coalescing.
    pub(crate) fn request_save(&self) {
        let mut flags = self.flags.lock();
        flags.dirty = true;
        self.work_ready.notify_one();
    }

    /// Ask the worker to exit.
    pub(crate) fn shutdown(&self) {
        let mut flags = self.flags.lock();
        flags.shutdown = true;
        self.work_ready.notify_one();
    }

    /// Consume a pending save request without performing it; used by
    /// explicit flushes that are about to save anyway.
    pub(crate) fn clear_dirty(&self) {
        self.flags.lock().dirty = false;
    }

    fn wait(&self) -> Work {
        let mut flags = self.flags.lock();
        loop {
            if flags.dirty {
                flags.dirty = false;
                return Work::Save;
            }
            if flags.shutdown {
                return Work::Shutdown;
            }
            self.work_ready.wait(&mut flags);
        }
    }
}

/// Start the saver worker for one database.
pub(crate) fn spawn_saver(shared: Arc<Shared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("tessera-saver-{}", shared.name))
        .spawn(move || {
            debug!(db = %shared.name, "saver started");
            loop {
                match shared.saver.wait() {
                    Work::Save => {
                        if let Err(e) = save_once(&shared) {
                            warn!(db = %shared.name, error = %e, "background save failed");
                        }
                    }
                    Work::Shutdown => break,
                }
            }
            debug!(db = %shared.name, "saver stopped");
        })
        .expect("saver thread spawns")
}
