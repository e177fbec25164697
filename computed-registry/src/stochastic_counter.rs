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

use std::sync::atomic::{AtomicU32, Ordering};

use itertools::Itertools;

/// Approximate, low-contention event counter.
///
/// Sharded the same way foyer shards its per-shard `usage: AtomicUsize`:
/// every increment touches only one shard, and only a sampled fraction of
/// calls pay for the interlocked add at all. The exact count is never
/// required by any caller — only "has this crossed a threshold lately".
pub struct StochasticCounter {
    shards: Vec<AtomicU32>,
    /// 1-in-`sample_every` calls actually update the shard.
    sample_every: u32,
}

impl StochasticCounter {
    pub fn new(shards: usize, sample_every: u32) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| AtomicU32::new(0)).collect_vec(),
            sample_every: sample_every.max(1),
        }
    }

    fn shard(&self, shard_hint: usize) -> &AtomicU32 {
        &self.shards[shard_hint % self.shards.len()]
    }

    /// Draws a sample; on a hit, bumps the shard and returns the
    /// post-increment value. On a miss, returns the shard's last known
    /// value unchanged.
    pub fn increment(&self, shard_hint: usize) -> (bool, u32) {
        let sampled = rand::random::<u32>() % self.sample_every == 0;
        let shard = self.shard(shard_hint);
        if sampled {
            let value = shard.fetch_add(1, Ordering::Relaxed) + 1;
            (true, value)
        } else {
            (false, shard.load(Ordering::Relaxed))
        }
    }

    /// Approximate total across all shards.
    pub fn value(&self) -> u64 {
        self.shards.iter().map(|s| s.load(Ordering::Relaxed) as u64).sum()
    }

    /// Resets every shard to zero.
    pub fn reset(&self) {
        for shard in &self.shards {
            shard.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_sampled_counts_every_call() {
        let counter = StochasticCounter::new(1, 1);
        for i in 1..=100 {
            let (sampled, value) = counter.increment(0);
            assert!(sampled);
            assert_eq!(value as u64, i);
        }
        assert_eq!(counter.value(), 100);
    }

    #[test]
    fn reset_zeroes_all_shards() {
        let counter = StochasticCounter::new(4, 1);
        for shard in 0..4 {
            counter.increment(shard);
        }
        assert_eq!(counter.value(), 4);
        counter.reset();
        assert_eq!(counter.value(), 0);
    }
}
