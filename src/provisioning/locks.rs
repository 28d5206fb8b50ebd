// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Keyed async mutexes.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key, created on first use.
///
/// Entries are dropped once no caller holds or waits on them, so the table
/// only grows with the number of keys in flight.
pub struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &K) -> Arc<Mutex<()>> {
        Arc::clone(
            &self
                .locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Wait for exclusive access to `key`.
    ///
    /// If the returned future is dropped while waiting, the entry is still
    /// pruned.
    pub async fn lock(&self, key: &K) -> KeyedGuard<'_, K> {
        let entry = self.entry(key);
        let mut guard = KeyedGuard {
            owner: self,
            key: key.clone(),
            guard: None,
        };
        guard.guard = Some(entry.lock_owned().await);
        guard
    }

    /// Take `key` only if nobody holds it.
    pub fn try_lock(&self, key: &K) -> Option<KeyedGuard<'_, K>> {
        let mut guard = KeyedGuard {
            owner: self,
            key: key.clone(),
            guard: None,
        };
        guard.guard = Some(self.entry(key).try_lock_owned().ok()?);
        Some(guard)
    }

    /// Keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn release(&self, key: &K) {
        // Only the table holds a reference once every guard and waiter is gone
        self.locks.remove_if(key, |_, m| Arc::strong_count(m) == 1);
    }
}

/// Held lock on one key. Also covers the wait, so an abandoned waiter
/// cleans up after itself.
pub struct KeyedGuard<'a, K: Eq + Hash + Clone> {
    owner: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        // Drop the mutex guard (and its Arc) before pruning the table
        self.guard.take();
        self.owner.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&"user".to_string()).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::<String>::new();
        let _a = locks.lock(&"a".to_string()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&"b".to_string())).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_entry() {
        let locks = KeyedLocks::<String>::new();
        let key = "user".to_string();

        let held = locks.lock(&key).await;
        let waited = tokio::time::timeout(Duration::from_millis(20), locks.lock(&key)).await;
        assert!(waited.is_err());
        assert_eq!(locks.len(), 1);

        drop(held);
        assert!(locks.is_empty());

        // Also when the waiter gives up after the holder is gone
        let held = locks.lock(&key).await;
        let waiter = locks.lock(&key);
        drop(held);
        drop(waiter);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn try_lock_skips_held_keys() {
        let locks = KeyedLocks::<String>::new();
        let key = "completion".to_string();

        let held = locks.lock(&key).await;
        assert!(locks.try_lock(&key).is_none());
        assert_eq!(locks.len(), 1);

        drop(held);
        assert!(locks.is_empty());
        let taken = locks.try_lock(&key);
        assert!(taken.is_some());
        drop(taken);
        assert!(locks.is_empty());
    }
}
