// Account locks - per-(owner, currency) serialization of balance mutations

use crate::primitives::AccountKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Mutex<HashMap<AccountKey, Arc<AsyncMutex<()>>>>;

/// Table of async mutexes, one per account key in use
#[derive(Default)]
pub(crate) struct KeyLocks {
    locks: Arc<LockTable>,
}

/// Held locks; released on drop, and their table entries pruned once idle
pub(crate) struct KeyGuards {
    guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<AccountKey>,
    table: Arc<LockTable>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &AccountKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    /// Acquire every key in the global [`AccountKey`] order
    pub(crate) async fn acquire(&self, keys: &[AccountKey]) -> KeyGuards {
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in &ordered {
            guards.push(self.lock_for(key).lock_owned().await);
        }
        KeyGuards {
            guards,
            keys: ordered,
            table: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Drop for KeyGuards {
    fn drop(&mut self) {
        self.guards.clear();
        // Entries are only handed out under the table lock, so a count of one
        // here means no holder or waiter is left
        let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
        for key in &self.keys {
            if table.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                table.remove(key);
            }
        }
    }
}
