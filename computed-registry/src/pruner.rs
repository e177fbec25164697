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

use std::sync::atomic::Ordering;
use std::sync::Arc;

use computed_registry_common::{Clock, ComputedInput};
use tracing::debug;

use crate::computed::Computed;
use crate::metrics::Metrics;
use crate::registry::Inner;

/// One full sweep over every shard, demoting idle strong references and
/// reclaiming entries whose target has already been collected.
///
/// Only ever run with one pass in flight at a time (the caller holds an
/// `AtomicBool` guard around this call) — mirrors `arcstur-moka`'s
/// `Invalidator::is_task_running` guard around its own background scan.
/// Each shard is locked only for the duration of its own sweep, never all
/// shards at once, so a slow sweep never stalls every shard's readers and
/// writers at once.
pub(crate) async fn run_pass<Inp, C>(inner: &Arc<Inner<Inp, C>>)
where
    Inp: ComputedInput,
    C: Computed<Input = Inp>,
{
    let now = inner.clock.now();
    let mut total_collected = 0u64;
    let mut total_demoted = 0u64;

    for (idx, shard_lock) in inner.shards.iter().enumerate() {
        let mut stale_keys = Vec::new();
        let mut demoted = 0u64;

        {
            let mut shard = shard_lock.lock();
            for (key, entry) in shard.map.iter_mut() {
                match &entry.strong {
                    None => {
                        if entry.handle.is_collected() {
                            stale_keys.push(key.clone());
                        }
                    }
                    Some(strong) => {
                        let deadline = strong
                            .last_access_time()
                            .saturating_add(strong.keep_alive_time().as_nanos().min(u64::MAX as u128) as u64);
                        if deadline < now {
                            entry.strong = None;
                            demoted += 1;
                        }
                    }
                }
            }

            let mut released = Vec::with_capacity(stale_keys.len());
            for key in &stale_keys {
                if let Some(entry) = shard.map.remove(key) {
                    released.push(entry.handle);
                }
            }
            drop(shard);
            for handle in released {
                inner.pool.release(handle, idx);
            }
        }

        total_collected += stale_keys.len() as u64;
        total_demoted += demoted;
    }

    if total_collected > 0 {
        inner.metrics.prune_collected.fetch_add(total_collected, Ordering::Relaxed);
    }
    if total_demoted > 0 {
        inner.metrics.prune_demoted.fetch_add(total_demoted, Ordering::Relaxed);
    }
    Metrics::incr(&inner.metrics.prune_passes);

    inner.prune_threshold.store(inner.total_capacity, Ordering::Relaxed);
    inner.counter.reset();

    debug!(collected = total_collected, demoted = total_demoted, "prune pass complete");
}
