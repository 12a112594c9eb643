use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// The wallet database's transaction lock
#[derive(Clone, Default)]
pub struct TxLock {
    inner: Arc<Mutex<()>>,
}

impl TxLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the lock is free and take it
    pub async fn lock(&self) -> LockHandle {
        LockHandle {
            _guard: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    pub fn try_lock(&self) -> Option<LockHandle> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| LockHandle { _guard: guard })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Proof of holding the transaction lock. Consumed by `release`, so a handle
/// can only ever be released once.
pub struct LockHandle {
    _guard: OwnedMutexGuard<()>,
}

impl LockHandle {
    pub fn release(self) {}
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockHandle")
    }
}
