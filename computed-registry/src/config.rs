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

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

/// Construction-time configuration for a [`crate::registry::ComputedRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Number of independently-locked shards. Defaults to the host's
    /// available parallelism.
    pub shards: usize,
    /// Expected steady-state entry count, used to size each shard's
    /// initial `HashMap` and handle pool capacity.
    pub expected_entries: usize,
    /// Fraction of registry operations that sample the stochastic prune
    /// counter (`1 / sample_every`, rounded to the nearest `u32`).
    pub prune_sample_probability: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let shards = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self { shards, expected_entries: 128, prune_sample_probability: 1.0 / 64.0 }
    }
}

impl RegistryConfig {
    pub(crate) fn sample_every(&self) -> u32 {
        if self.prune_sample_probability <= 0.0 {
            u32::MAX
        } else {
            (1.0 / self.prune_sample_probability).round().max(1.0) as u32
        }
    }
}

/// Tunables for [`crate::delayer::UpdateDelayer`], matching the
/// upstream `ComputedOptions` delay knobs exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateDelayerConfig {
    pub delay: Duration,
    pub min_extra_error_delay: Duration,
    pub max_extra_error_delay: Duration,
    pub cancel_delays_delay: Duration,
    #[serde(with = "level_serde")]
    pub log_level: Level,
}

impl Default for UpdateDelayerConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            min_extra_error_delay: Duration::from_secs(5),
            max_extra_error_delay: Duration::from_secs(120),
            cancel_delays_delay: Duration::from_millis(50),
            log_level: Level::DEBUG,
        }
    }
}

mod level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, s: S) -> Result<S::Ok, S::Error> {
        level.as_str().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Level, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
