use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use tabula_common::{RecordId, TableId};

use crate::error::EngineError;

pub type RecordKey = (TableId, RecordId);

/// Exclusive sections over records. A pass holds every record it may touch
/// for the whole of its execution.
#[derive(Debug, Default)]
pub struct RecordLockManager {
    held: Mutex<FxHashSet<RecordKey>>,
    released: Condvar,
}

impl RecordLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all of `keys` or none of them, waiting until `deadline` for
    /// records held by other passes.
    pub fn acquire(
        &self,
        keys: FxHashSet<RecordKey>,
        deadline: Instant,
    ) -> Result<RecordLockGuard<'_>, EngineError> {
        let started = Instant::now();
        let mut held = self.held.lock();
        while keys.iter().any(|k| held.contains(k)) {
            if self.released.wait_until(&mut held, deadline).timed_out()
                && keys.iter().any(|k| held.contains(k))
            {
                return Err(EngineError::ResourceTimeout {
                    waited: started.elapsed(),
                });
            }
        }
        held.extend(keys.iter().cloned());
        Ok(RecordLockGuard { manager: self, keys })
    }

    pub fn is_locked(&self, table: &TableId, record: &RecordId) -> bool {
        self.held.lock().contains(&(table.clone(), record.clone()))
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    fn release(&self, keys: &FxHashSet<RecordKey>) {
        let mut held = self.held.lock();
        for k in keys {
            held.remove(k);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Records held by one pass; released on drop.
#[derive(Debug)]
pub struct RecordLockGuard<'a> {
    manager: &'a RecordLockManager,
    keys: FxHashSet<RecordKey>,
}

impl RecordLockGuard<'_> {
    pub fn keys(&self) -> &FxHashSet<RecordKey> {
        &self.keys
    }

    pub fn covers(&self, keys: &FxHashSet<RecordKey>) -> bool {
        keys.is_subset(&self.keys)
    }
}

impl Drop for RecordLockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.keys);
    }
}
