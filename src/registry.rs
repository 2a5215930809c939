use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub const MAX_SESSIONS: usize = 32;

struct Slot {
    alive: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

/// Fixed-capacity table of session slots. The accept loop uses it to bound
/// concurrency at [`MAX_SESSIONS`], and a shutdown coordinator uses it to
/// flip every live session's `alive` flag and join its worker.
///
/// Each slot is written only by the accept path (on reservation) and by its
/// own session's worker (clearing `alive`); the shutdown path only reads
/// `alive` and writes it once per slot during shutdown, so a `Mutex` here
/// guards the slot *table* bookkeeping, not per-session hot-path state.
pub struct Registry {
    slots: Mutex<Vec<Option<Slot>>>,
}

impl Registry {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_SESSIONS);
        slots.resize_with(MAX_SESSIONS, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Reserves a slot for a newly accepted session. Returns `None` if all
    /// `MAX_SESSIONS` slots are occupied, in which case the caller must
    /// close the connection immediately without sending any response.
    pub async fn reserve(&self, alive: Arc<AtomicBool>, worker: JoinHandle<()>) -> Option<usize> {
        let mut slots = self.slots.lock().await;
        for (index, slot) in slots.iter_mut().enumerate() {
            let occupied = matches!(slot, Some(s) if s.alive.load(Ordering::Relaxed));
            if !occupied {
                *slot = Some(Slot { alive, worker });
                return Some(index);
            }
        }
        None
    }

    pub async fn is_full(&self) -> bool {
        let slots = self.slots.lock().await;
        slots
            .iter()
            .all(|slot| matches!(slot, Some(s) if s.alive.load(Ordering::Relaxed)))
    }

    /// Clears every live session's `alive` flag and joins every worker.
    /// Used by the SIGINT shutdown coordinator.
    pub async fn shutdown_all(&self) {
        let mut slots = self.slots.lock().await;
        for slot in slots.iter_mut() {
            if let Some(s) = slot.take() {
                s.alive.store(false, Ordering::Relaxed);
                let _ = s.worker.await;
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
