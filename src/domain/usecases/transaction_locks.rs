use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 1024;

/// Async mutexes keyed by string, created on demand.
///
/// Used to serialize work on one original transaction id (or one user)
/// without blocking unrelated keys. Callers that take more than one lock
/// must take the `user:` lock before the `otid:` lock.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > PRUNE_THRESHOLD {
                // Only the map holds an idle lock.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key.to_owned()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn lock_transaction(&self, original_transaction_id: &str) -> OwnedMutexGuard<()> {
        self.lock(&format!("otid:{original_transaction_id}")).await
    }

    pub async fn lock_user(&self, user_id: impl std::fmt::Display) -> OwnedMutexGuard<()> {
        self.lock(&format!("user:{user_id}")).await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
