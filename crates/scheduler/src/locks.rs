use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per volume name. Attempts against the same volume queue
/// behind each other; different volumes never contend.
#[derive(Default)]
pub(crate) struct VolumeLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl VolumeLocks {
    pub(crate) async fn acquire(&self, volume: &str) -> VolumeGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(volume.to_owned()).or_default())
        };
        let guard = lock.lock_owned().await;
        VolumeGuard {
            locks: self,
            volume: volume.to_owned(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Held for the duration of one attempt. The map entry goes away with the
/// last holder or waiter.
pub(crate) struct VolumeGuard<'a> {
    locks: &'a VolumeLocks,
    volume: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VolumeGuard<'_> {
    fn drop(&mut self) {
        // Release first so the owned guard's Arc no longer counts.
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.volume)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.volume);
        }
    }
}
