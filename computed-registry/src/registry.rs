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

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use computed_registry_common::{sizing, Clock, CoarseClock, ComputedInput, Error};
use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use tracing::{instrument, trace};

use crate::computed::Computed;
use crate::config::RegistryConfig;
use crate::handle_pool::{WeakHandlePool, WeakSlot};
use crate::lock_set::AsyncLockSet;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pruner;
use crate::stochastic_counter::StochasticCounter;

/// One shard's slot for a registered computation.
///
/// `strong` is the keep-alive pin; `handle` is always present and is the
/// weak path back to the computation once `strong` is cleared by the
/// pruner. Mirrors the split between a live cache entry and its eviction
/// handle in `foyer-memory`'s `CacheShard`.
pub(crate) struct Entry<C: Computed> {
    pub(crate) strong: Option<Arc<C>>,
    pub(crate) handle: Box<WeakSlot<C>>,
}

pub(crate) struct RegistryShard<Inp: ComputedInput, C: Computed<Input = Inp>> {
    pub(crate) map: HashMap<Inp, Entry<C>>,
}

pub(crate) struct Inner<Inp: ComputedInput, C: Computed<Input = Inp>> {
    pub(crate) shards: Vec<Mutex<RegistryShard<Inp, C>>>,
    pub(crate) pool: WeakHandlePool<C>,
    pub(crate) counter: StochasticCounter,
    pub(crate) prune_threshold: AtomicUsize,
    pruning: AtomicBool,
    prune_gate: Mutex<()>,
    pub(crate) total_capacity: usize,
    lock_set: Arc<AsyncLockSet<Inp>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Metrics,
}

/// A sharded, weakly-referenced cache of live computations keyed by
/// their input fingerprint.
///
/// Cloning a `ComputedRegistry` is cheap and shares the same storage —
/// the handle is an `Arc<Inner<..>>` underneath, the same "cheap handle
/// over shared shards" shape as `foyer_memory::Cache`.
pub struct ComputedRegistry<Inp: ComputedInput, C: Computed<Input = Inp>> {
    inner: Arc<Inner<Inp, C>>,
}

impl<Inp: ComputedInput, C: Computed<Input = Inp>> Clone for ComputedRegistry<Inp, C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = ahash::AHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

impl<Inp: ComputedInput, C: Computed<Input = Inp>> ComputedRegistry<Inp, C> {
    pub fn new(config: RegistryConfig) -> Result<Self, Error> {
        Self::with_clock(config, Arc::new(CoarseClock::default()))
    }

    pub fn with_clock(config: RegistryConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        if config.shards == 0 {
            return Err(Error::InvalidConfiguration("shards must be non-zero"));
        }
        // §4.4's own capacity formula, `largest_prime_leq(min(16384,
        // next_pow2(shards * expected_load) * 128))`, lives in
        // `sizing::default_capacity` and is invoked here with `shards *
        // expected_entries` standing in for the formula's load term.
        let per_shard_capacity = sizing::default_capacity(config.shards.saturating_mul(config.expected_entries.max(1)));
        let shards = (0..config.shards)
            .map(|_| Mutex::new(RegistryShard { map: HashMap::with_capacity(per_shard_capacity.min(1024)) }))
            .collect_vec();
        let total_capacity = config.shards * per_shard_capacity;

        let inner = Arc::new(Inner {
            shards,
            pool: WeakHandlePool::new(config.shards, per_shard_capacity),
            counter: StochasticCounter::new(config.shards, config.sample_every()),
            prune_threshold: AtomicUsize::new(total_capacity),
            pruning: AtomicBool::new(false),
            prune_gate: Mutex::new(()),
            total_capacity,
            lock_set: Arc::new(AsyncLockSet::new()),
            clock,
            metrics: Metrics::new(),
        });
        Ok(Self { inner })
    }

    fn shard_index(&self, key: &Inp) -> usize {
        (hash_of(key) as usize) % self.inner.shards.len()
    }

    /// Returns the live computation registered for `key`, if any, and
    /// touches it on a hit.
    #[instrument(skip(self))]
    pub fn try_get(&self, key: &Inp) -> Option<Arc<C>> {
        self.maybe_trigger_prune(key);
        let idx = self.shard_index(key);
        let mut shard = self.inner.shards[idx].lock();

        let upgraded = match shard.map.get_mut(key) {
            Some(entry) => {
                if let Some(strong) = entry.strong.clone() {
                    Some(strong)
                } else if let Some(strong) = entry.handle.upgrade() {
                    entry.strong = Some(strong.clone());
                    Some(strong)
                } else {
                    None
                }
            }
            None => None,
        };

        match upgraded {
            Some(strong) => {
                drop(shard);
                strong.touch();
                Metrics::incr(&self.inner.metrics.hit);
                trace!("try_get hit");
                Some(strong)
            }
            None => {
                let stale = shard.map.remove(key);
                drop(shard);
                if let Some(entry) = stale {
                    self.inner.pool.release(entry.handle, idx);
                }
                Metrics::incr(&self.inner.metrics.miss);
                trace!("try_get miss");
                None
            }
        }
    }

    /// Publishes `computed` as the live entry for its own `input()`,
    /// evicting any predecessor per §4.4's Register contract: a live,
    /// different predecessor is invalidated (driving its own eventual
    /// `Unregister`) and unconditionally replaced; registering the same
    /// `Arc` twice is a no-op. Returns the `Arc` that ended up live for
    /// this key — `computed` itself, unless `computed` had already raced
    /// to `Invalidated` by the time it was inserted.
    #[instrument(skip(self, computed))]
    pub fn register(&self, computed: Arc<C>) -> Arc<C> {
        let key = computed.input().clone();
        let idx = self.shard_index(&key);
        self.maybe_trigger_prune(&key);

        let predecessor = {
            let shard = self.inner.shards[idx].lock();
            shard.map.get(&key).and_then(|entry| entry.strong.clone().or_else(|| entry.handle.upgrade()))
        };

        if let Some(existing) = predecessor {
            if Arc::ptr_eq(&existing, &computed) {
                trace!("register found itself already live, nothing to do");
                return existing;
            }
            if !existing.state().is_invalidated() {
                trace!("register evicting live predecessor, invalidating it");
                // Dropped the shard lock before calling out to `computed`
                // code: a real `invalidate()` normally drives `Unregister`,
                // which takes this same shard's lock.
                existing.invalidate();
            }
        }

        Metrics::incr(&self.inner.metrics.register);
        let handle = self.inner.pool.acquire(&computed, idx);
        let replaced = {
            let mut shard = self.inner.shards[idx].lock();
            shard.map.insert(key.clone(), Entry { strong: Some(computed.clone()), handle })
        };
        if let Some(prev_entry) = replaced {
            Metrics::incr(&self.inner.metrics.replace);
            self.inner.pool.release(prev_entry.handle, idx);
        }

        // The computation may have raced to Invalidated between being
        // constructed and being inserted here. If so, remove exactly the
        // entry we just inserted — never a placeholder or another
        // caller's entry for the same key.
        if computed.state().is_invalidated() {
            self.remove_if_matches(&key, &computed);
        }

        computed
    }

    fn remove_if_matches(&self, key: &Inp, computed: &Arc<C>) {
        let idx = self.shard_index(key);
        let mut shard = self.inner.shards[idx].lock();
        let matches = shard.map.get(key).is_some_and(|entry| {
            entry
                .strong
                .as_ref()
                .map(|s| Arc::ptr_eq(s, computed))
                .unwrap_or_else(|| entry.handle.upgrade().is_some_and(|u| Arc::ptr_eq(&u, computed)))
        });
        if matches {
            let entry = shard.map.remove(key).unwrap();
            drop(shard);
            self.inner.pool.release(entry.handle, idx);
        }
    }

    /// Removes `computed` from the registry. Requires it to already be
    /// `Invalidated`; returns whether an entry was actually present and
    /// removed (a concurrent caller may have already done so).
    #[instrument(skip(self, computed))]
    pub fn unregister(&self, computed: &Arc<C>) -> Result<bool, Error> {
        if !computed.state().is_invalidated() {
            return Err(Error::WrongComputedState);
        }
        let key = computed.input().clone();
        let idx = self.shard_index(&key);
        let mut shard = self.inner.shards[idx].lock();
        let matches = shard.map.get(&key).is_some_and(|entry| {
            entry
                .strong
                .as_ref()
                .map(|s| Arc::ptr_eq(s, computed))
                .unwrap_or_else(|| entry.handle.upgrade().is_some_and(|u| Arc::ptr_eq(&u, computed)))
        });
        if !matches {
            return Ok(false);
        }
        let entry = shard.map.remove(&key).unwrap();
        drop(shard);
        self.inner.pool.release(entry.handle, idx);
        Metrics::incr(&self.inner.metrics.unregister);
        Ok(true)
    }

    /// Returns the async lock set guarding recomputation for a given
    /// input. `function` is accepted for interface parity with external
    /// per-function override hooks; the shared, registry-wide set is
    /// returned regardless, matching the "by default" fallback.
    pub fn locks_for<F>(&self, _function: &F) -> Arc<AsyncLockSet<Inp>> {
        self.inner.lock_set.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Number of live entries across all shards (strong-pinned or
    /// still-weakly-reachable). Approximate under concurrent mutation;
    /// intended for tests and diagnostics, not the hot path.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|s| s.lock().map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the registry. Shards and the handle pool drop with it;
    /// provided for symmetry with the upstream API and to make disposal
    /// an explicit, named step at call sites.
    pub fn dispose(self) {}

    /// `counter` is sharded so a sampled op only ever touches one shard's
    /// atomic (§4.2); `prune_threshold` is an aggregate across all shards
    /// (§4.4: `min(usize::MAX/2, total_capacity)`). Comparing a single
    /// shard's sample against the aggregate would make a pass roughly
    /// `shards`× rarer than intended, so the threshold is divided evenly
    /// across shards before the comparison.
    fn per_shard_prune_threshold(&self) -> usize {
        self.inner.prune_threshold.load(Ordering::Relaxed) / self.inner.shards.len().max(1)
    }

    fn maybe_trigger_prune(&self, key: &Inp) {
        let shard_hint = self.shard_index(key);
        let (sampled, value) = self.inner.counter.increment(shard_hint);
        if !sampled {
            return;
        }
        if (value as usize) < self.per_shard_prune_threshold() {
            return;
        }
        let Some(_gate) = self.inner.prune_gate.try_lock() else { return };
        if (value as usize) < self.per_shard_prune_threshold() {
            return;
        }
        self.inner.counter.reset();
        if self.inner.pruning.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                pruner::run_pass(&inner).await;
                inner.pruning.store(false, Ordering::Release);
            });
        }
    }
}

/// Drives one pruner pass synchronously, bypassing the stochastic
/// sampling trigger. Exists for integration tests that need
/// deterministic, on-demand sweeps against a [`computed_registry_common::ManualClock`]
/// rather than waiting on the sampled trigger's timing.
#[doc(hidden)]
pub async fn run_pruner_pass_for_test<Inp: ComputedInput, C: Computed<Input = Inp>>(
    registry: &ComputedRegistry<Inp, C>,
) {
    pruner::run_pass(&registry.inner).await;
}
