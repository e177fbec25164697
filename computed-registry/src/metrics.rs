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

use std::sync::atomic::{AtomicU64, Ordering};

/// Plain atomic counters for the registry's operation boundaries.
///
/// Fetched-and-added inline at each call site, the same way
/// `foyer-memory`'s cache shards bump their own `Metrics` struct rather
/// than going through a generic recorder on the hot path.
#[derive(Debug, Default)]
pub struct Metrics {
    pub hit: AtomicU64,
    pub miss: AtomicU64,
    pub register: AtomicU64,
    pub replace: AtomicU64,
    pub unregister: AtomicU64,
    pub prune_demoted: AtomicU64,
    pub prune_collected: AtomicU64,
    pub prune_passes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            register: self.register.load(Ordering::Relaxed),
            replace: self.replace.load(Ordering::Relaxed),
            unregister: self.unregister.load(Ordering::Relaxed),
            prune_demoted: self.prune_demoted.load(Ordering::Relaxed),
            prune_collected: self.prune_collected.load(Ordering::Relaxed),
            prune_passes: self.prune_passes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`Metrics`], safe to log or export without
/// holding onto the live atomics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hit: u64,
    pub miss: u64,
    pub register: u64,
    pub replace: u64,
    pub unregister: u64,
    pub prune_demoted: u64,
    pub prune_collected: u64,
    pub prune_passes: u64,
}
