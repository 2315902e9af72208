//! Per-(material, warehouse) mutual exclusion.
//!
//! An operation declares every [`LedgerKey`] it will touch up front and takes
//! them all at once: either the whole set is free and becomes held, or the
//! caller waits (bounded) for a release. Acquiring a set atomically means two
//! operations can never each hold half of what the other needs, so there is
//! no lock-order deadlock even when a split touches two packets.
//!
//! Disjoint key sets never wait on each other; the table's own mutex is held
//! only while checking/updating the held set.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use gemledger_core::{DomainError, DomainResult};

use crate::ledger_store::LedgerKey;

#[derive(Debug, Default)]
pub struct KeyLockTable {
    held: Mutex<HashSet<LedgerKey>>,
    released: Condvar,
}

impl KeyLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_held(&self) -> MutexGuard<'_, HashSet<LedgerKey>> {
        // The set is only mutated by insert/remove of whole key sets, so it
        // stays consistent even if a holder panicked.
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquire every key in `keys`, waiting at most `timeout` for them to be
    /// free. Keys are sorted and de-duplicated first.
    pub fn acquire(
        &self,
        keys: impl IntoIterator<Item = LedgerKey>,
        timeout: Duration,
    ) -> DomainResult<KeyLocks<'_>> {
        let mut keys: Vec<LedgerKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let deadline = Instant::now() + timeout;
        let mut held = self.lock_held();
        loop {
            if keys.iter().all(|k| !held.contains(k)) {
                held.extend(keys.iter().copied());
                debug!(keys = keys.len(), "ledger keys acquired");
                return Ok(KeyLocks { table: self, keys });
            }

            let now = Instant::now();
            if now >= deadline {
                let busy = keys
                    .iter()
                    .find(|k| held.contains(k))
                    .map(|k| k.to_string())
                    .unwrap_or_default();
                return Err(DomainError::contention(format!(
                    "timed out after {timeout:?} waiting for {busy}"
                )));
            }

            held = match self.released.wait_timeout(held, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Number of keys currently held (diagnostics/tests).
    pub fn held_count(&self) -> usize {
        self.lock_held().len()
    }

    fn release(&self, keys: &[LedgerKey]) {
        let mut held = self.lock_held();
        for k in keys {
            held.remove(k);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Guard over an acquired key set. Released on drop.
#[derive(Debug)]
pub struct KeyLocks<'a> {
    table: &'a KeyLockTable,
    keys: Vec<LedgerKey>,
}

impl KeyLocks<'_> {
    pub fn covers(&self, key: &LedgerKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    /// Held keys, in acquisition (sorted) order.
    pub fn keys(&self) -> &[LedgerKey] {
        &self.keys
    }
}

impl Drop for KeyLocks<'_> {
    fn drop(&mut self) {
        self.table.release(&self.keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemledger_core::{PacketId, WarehouseId};
    use std::sync::Arc;
    use std::thread;

    fn key() -> LedgerKey {
        LedgerKey::packet(PacketId::new(), WarehouseId::new())
    }

    #[test]
    fn keys_are_sorted_and_deduplicated() {
        let table = KeyLockTable::new();
        let (a, b) = (key(), key());
        let locks = table.acquire([b, a, b], Duration::from_millis(10)).unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(locks.keys(), expected.as_slice());
        assert_eq!(table.held_count(), 2);

        drop(locks);
        assert_eq!(table.held_count(), 0);
    }

    #[test]
    fn overlapping_set_times_out_with_contention() {
        let table = KeyLockTable::new();
        let (a, b) = (key(), key());
        let _held = table.acquire([a], Duration::from_millis(10)).unwrap();

        let err = table.acquire([b, a], Duration::from_millis(20)).unwrap_err();
        assert!(err.is_transient());
        // The free key was not taken by the failed attempt.
        assert_eq!(table.held_count(), 1);
    }

    #[test]
    fn disjoint_sets_do_not_block() {
        let table = KeyLockTable::new();
        let _a = table.acquire([key()], Duration::from_millis(10)).unwrap();
        let _b = table.acquire([key()], Duration::ZERO).unwrap();
        assert_eq!(table.held_count(), 2);
    }

    #[test]
    fn waiter_proceeds_once_holder_releases() {
        let table = Arc::new(KeyLockTable::new());
        let k = key();
        let held = table.acquire([k], Duration::from_millis(10)).unwrap();

        let waiter = {
            let table = table.clone();
            thread::spawn(move || table.acquire([k], Duration::from_secs(5)).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
    }
}
