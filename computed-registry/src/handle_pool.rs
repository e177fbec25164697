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

use std::sync::{Arc, Weak};

use crossbeam::queue::ArrayQueue;
use itertools::Itertools;

use crate::computed::Computed;

/// A rebindable weak reference slot.
///
/// Pooled instead of allocated fresh on every `register`/`try_get`
/// promotion, the same way foyer's `CacheSharedState::object_pool` pools
/// boxed handles instead of allocating on every insert.
pub struct WeakSlot<C: Computed> {
    target: Option<Weak<C>>,
}

impl<C: Computed> WeakSlot<C> {
    fn empty() -> Self {
        Self { target: None }
    }

    /// Rebinds this slot to point at `target`.
    pub fn bind(&mut self, target: &Arc<C>) {
        self.target = Some(Arc::downgrade(target));
    }

    /// Clears the slot so it can be safely pooled and reused.
    pub fn clear(&mut self) {
        self.target = None;
    }

    /// Attempts to upgrade the weak reference to a strong one.
    ///
    /// `None` means the slot is either unbound or its target has been
    /// collected.
    pub fn upgrade(&self) -> Option<Arc<C>> {
        self.target.as_ref().and_then(Weak::upgrade)
    }

    /// `true` once the target has been dropped (or the slot was never
    /// bound in the first place).
    pub fn is_collected(&self) -> bool {
        match &self.target {
            Some(weak) => weak.strong_count() == 0,
            None => true,
        }
    }
}

/// Sharded pool of recyclable [`WeakSlot`]s.
///
/// Sharded by a caller-supplied randomized hash of the input key (the
/// pool itself never hashes anything), matching §4.1. Each shard is a
/// `crossbeam::queue::ArrayQueue`, the same bounded lock-free structure
/// foyer uses for its handle object pool; overflow on `release` is
/// silently discarded, exactly as the spec requires.
pub struct WeakHandlePool<C: Computed> {
    shards: Vec<ArrayQueue<Box<WeakSlot<C>>>>,
}

impl<C: Computed> WeakHandlePool<C> {
    pub fn new(shards: usize, per_shard_capacity: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| ArrayQueue::new(per_shard_capacity.max(1)))
            .collect_vec();
        Self { shards }
    }

    fn shard(&self, shard_hint: usize) -> &ArrayQueue<Box<WeakSlot<C>>> {
        &self.shards[shard_hint % self.shards.len()]
    }

    /// Returns a handle bound to `target`, recycling one from the shard's
    /// free list when available.
    pub fn acquire(&self, target: &Arc<C>, shard_hint: usize) -> Box<WeakSlot<C>> {
        let mut slot = self.shard(shard_hint).pop().unwrap_or_else(|| Box::new(WeakSlot::empty()));
        slot.bind(target);
        slot
    }

    /// Clears and returns `handle` to its shard's free list. Overflow is
    /// discarded (the shard stays at its configured capacity).
    pub fn release(&self, mut handle: Box<WeakSlot<C>>, shard_hint: usize) {
        handle.clear();
        let _ = self.shard(shard_hint).push(handle);
    }
}
