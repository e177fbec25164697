//  Copyright 2024 Computed Registry Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use computed_registry_common::{ComputedInput, Error};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

tokio::task_local! {
    static HELD_KEYS: RefCell<HashSet<u64>>;
}

/// One logical mutex per `ComputedInput`, created on demand and dropped
/// once its last guard releases.
///
/// Grounded on the `grapevine` crate's `TokenSet`/`OnDemandHashMap`
/// (keyed map of `Weak`-style entries cleaned up when unreferenced),
/// adapted to clean up eagerly under the shard lock on guard drop rather
/// than via a background channel-driven task — this core already has a
/// sharded-mutex map idiom (the registry itself) and reuses it here
/// instead of introducing a second concurrency pattern.
pub struct AsyncLockSet<Inp: ComputedInput> {
    entries: Mutex<HashMap<Inp, Arc<AsyncMutex<()>>>>,
}

impl<Inp: ComputedInput> Default for AsyncLockSet<Inp> {
    fn default() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

impl<Inp: ComputedInput> AsyncLockSet<Inp> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_mutex(&self, key: &Inp) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock();
        entries.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    fn forget_if_unused(&self, key: &Inp, mutex: &Arc<AsyncMutex<()>>) {
        let mut entries = self.entries.lock();
        if let Some(current) = entries.get(key) {
            // Strong count of 2: our local `mutex` clone plus the one in
            // the map. If nobody else holds a reference it is safe to
            // drop the map's own entry.
            if Arc::ptr_eq(current, mutex) && Arc::strong_count(current) <= 2 {
                entries.remove(key);
            }
        }
    }

    /// Acquires the per-input lock, suspending until it is free or
    /// `cancel` fires.
    ///
    /// `ReentryMode::CheckedFail`: if the calling task already holds this
    /// key's lock, returns `Error::Reentrant` immediately instead of
    /// deadlocking.
    pub async fn acquire(&self, key: Inp, cancel: CancellationToken) -> Result<LockGuard<'_, Inp>, Error>
    where
        Inp: std::hash::Hash,
    {
        let key_hash = hash_of(&key);
        let reentrant = HELD_KEYS
            .try_with(|held| held.borrow().contains(&key_hash))
            .unwrap_or(false);
        if reentrant {
            return Err(Error::Reentrant);
        }

        let mutex = self.entry_mutex(&key);
        let guard = tokio::select! {
            guard = mutex.clone().lock_owned() => guard,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let _ = HELD_KEYS.try_with(|held| {
            held.borrow_mut().insert(key_hash);
        });

        Ok(LockGuard { set: self, key, key_hash, mutex, _guard: guard })
    }

    /// Number of distinct inputs currently locked or pending.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn hash_of<Inp: std::hash::Hash>(key: &Inp) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = ahash::AHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// RAII guard for a held per-input lock. Releases the `tokio::Mutex` and,
/// if no other guard is waiting, removes the set's bookkeeping entry on
/// drop.
pub struct LockGuard<'a, Inp: ComputedInput> {
    set: &'a AsyncLockSet<Inp>,
    key: Inp,
    key_hash: u64,
    mutex: Arc<AsyncMutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl<'a, Inp: ComputedInput> Drop for LockGuard<'a, Inp> {
    fn drop(&mut self) {
        let _ = HELD_KEYS.try_with(|held| {
            held.borrow_mut().remove(&self.key_hash);
        });
        self.set.forget_if_unused(&self.key, &self.mutex);
    }
}

/// Runs `scope` with a fresh held-keys set for reentry detection. Real
/// callers run their top-level task under this once; tests call it
/// directly around the scenario under test.
pub async fn with_reentry_scope<F, Fut, T>(scope: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    HELD_KEYS.scope(RefCell::new(HashSet::new()), scope()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serializes_producers_for_same_key() {
        let set: Arc<AsyncLockSet<u64>> = Arc::new(AsyncLockSet::new());
        let order = Arc::new(Mutex::new(vec![]));

        let mut handles = vec![];
        for i in 0..4 {
            let set = set.clone();
            let order = order.clone();
            handles.push(tokio::spawn(with_reentry_scope(move || async move {
                let guard = set.acquire(1, CancellationToken::new()).await.unwrap();
                order.lock().push(i);
                tokio::task::yield_now().await;
                drop(guard);
            })));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(order.lock().len(), 4);
    }

    #[tokio::test]
    async fn entry_is_cleaned_up_after_release() {
        let set: AsyncLockSet<u64> = AsyncLockSet::new();
        with_reentry_scope(|| async {
            let guard = set.acquire(7, CancellationToken::new()).await.unwrap();
            assert_eq!(set.len(), 1);
            drop(guard);
        })
        .await;
        assert_eq!(set.len(), 0);
    }

    #[tokio::test]
    async fn reentry_from_same_task_fails() {
        let set: AsyncLockSet<u64> = AsyncLockSet::new();
        with_reentry_scope(|| async {
            let _guard = set.acquire(1, CancellationToken::new()).await.unwrap();
            let second = set.acquire(1, CancellationToken::new()).await;
            assert!(matches!(second, Err(Error::Reentrant)));
        })
        .await;
    }

    #[tokio::test]
    async fn cancel_during_wait_surfaces_cancelled() {
        let set: Arc<AsyncLockSet<u64>> = Arc::new(AsyncLockSet::new());
        let holder = with_reentry_scope({
            let set = set.clone();
            || async move { set.acquire(1, CancellationToken::new()).await.unwrap() }
        })
        .await;

        let cancel = CancellationToken::new();
        let waiter = {
            let set = set.clone();
            let cancel = cancel.clone();
            tokio::spawn(with_reentry_scope(move || async move { set.acquire(1, cancel).await }))
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        drop(holder);
    }
}
