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

/// Injectable monotonic clock, nanosecond-resolution.
///
/// The pruner and every `Computed` implementation must read timestamps
/// through the same `Clock` instance so that `lastAccessTime +
/// keepAliveTime < now` comparisons are meaningful. Never wraps
/// `SystemTime` — wall-clock jumps must not affect pruning decisions.
pub trait Clock: Send + Sync + 'static {
    /// Nanoseconds since some unspecified, monotonic epoch.
    fn now(&self) -> u64;
}

/// Default clock: a cached, coarse-grained monotonic reading.
///
/// `quanta::Clock` amortizes the cost of reading the hardware counter the
/// same way `arcstur-moka`'s invalidator relies on `quanta::Instant` for
/// cheap per-entry timestamping under contention. Readings are taken as
/// calibrated `quanta::Instant`s (never the raw, uncalibrated TSC tick
/// count `Clock::raw()` returns) and reported as nanoseconds since this
/// clock's construction.
#[derive(Clone)]
pub struct CoarseClock {
    inner: quanta::Clock,
    epoch: quanta::Instant,
}

impl Default for CoarseClock {
    fn default() -> Self {
        let inner = quanta::Clock::new();
        let epoch = inner.now();
        Self { inner, epoch }
    }
}

impl Clock for CoarseClock {
    fn now(&self) -> u64 {
        self.inner.now().duration_since(self.epoch).as_nanos().min(u64::MAX as u128) as u64
    }
}

/// A settable clock for deterministic tests (the KeepAlive property in
/// particular needs to advance time without sleeping).
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::Release);
    }

    pub fn advance(&self, nanos: u64) {
        self.now.fetch_add(nanos, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
