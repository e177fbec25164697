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

//! A weakly-referenced, concurrently-pruned cache of live computations.
//!
//! [`ComputedRegistry`] is the storage core a reactive/incremental
//! computation runtime sits on top of: it holds at most one live entry
//! per input fingerprint, strong-pins it for a configurable keep-alive
//! window after last access, and otherwise lets it go through a plain
//! `Weak` reference. A background [`pruner`] sweep reclaims collected
//! entries and demotes idle ones; [`delayer::UpdateDelayer`] coalesces
//! the delays a caller places in front of recomputation.
//!
//! The registry itself never inspects a computation's payload or its
//! dependency edges — see [`computed::Computed`] for the entire surface
//! it relies on.

pub mod computed;
pub mod config;
pub mod delayer;
pub mod handle_pool;
pub mod lock_set;
pub mod metrics;
mod pruner;
pub mod registry;
pub mod stochastic_counter;

pub use computed::{Computed, ComputedState};
pub use computed_registry_common::{Clock, CoarseClock, ComputedInput, Error, ManualClock};
pub use config::{RegistryConfig, UpdateDelayerConfig};
pub use delayer::UpdateDelayer;
pub use handle_pool::{WeakHandlePool, WeakSlot};
pub use lock_set::{AsyncLockSet, LockGuard};
pub use metrics::{Metrics, MetricsSnapshot};
pub use registry::ComputedRegistry;
pub use stochastic_counter::StochasticCounter;
