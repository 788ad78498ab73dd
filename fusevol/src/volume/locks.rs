//! Per-volume exclusive locks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per volume ID.
///
/// Mount, Unmount and Delete hold the volume's lock for their whole
/// read-check-write sequence, so two calls on the same volume never
/// interleave. Calls on different volumes proceed independently.
#[derive(Default)]
pub struct VolumeLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `volume_id`.
    pub async fn acquire(&self, volume_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(volume_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted volume.
    pub fn forget(&self, volume_id: &str) {
        self.locks.lock().remove(volume_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}
