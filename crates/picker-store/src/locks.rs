//! Per-key async locks

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key, created on first use and dropped with the
/// last guard or waiter
#[derive(Debug)]
pub(crate) struct KeyLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

/// Exclusive access to one key of a [`KeyLocks`]
pub(crate) struct KeyGuard<'a, K: Eq + Hash> {
    locks: &'a KeyLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> KeyLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Wait for exclusive access to `key`
    pub(crate) async fn lock(&self, key: &K) -> KeyGuard<'_, K> {
        // clone the Arc out so the shard guard is released before awaiting
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyGuard {
            locks: self,
            key: key.clone(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // the map holds the only reference once nobody waits on the key;
        // lookups clone under the same shard lock, so none can slip in
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::<u32>::new());
        let guard = locks.lock(&1).await;

        let other = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = other.lock(&1).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyLocks::<u32>::new();
        let _a = locks.lock(&1).await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock(&2))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn released_keys_are_forgotten() {
        let locks = KeyLocks::<u32>::new();
        for key in 0..100 {
            let _guard = locks.lock(&key).await;
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn entry_survives_while_someone_waits() {
        let locks = Arc::new(KeyLocks::<u32>::new());
        let guard = locks.lock(&7).await;

        let other = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = other.lock(&7).await;
            other.len()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(locks.len(), 0);
    }
}
