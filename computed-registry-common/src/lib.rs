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

//! Shared trait bounds, clock abstraction, sizing helpers and error
//! taxonomy used by `computed-registry`.

pub mod clock;
pub mod error;
pub mod sizing;

/// Bound satisfied by any input fingerprint the registry can key on.
///
/// Mirrors the `Key` bound foyer's cache layer imposes on cache keys: the
/// registry never does anything with an input besides hash, compare and
/// clone it.
pub trait ComputedInput: Clone + Send + Sync + 'static + std::hash::Hash + Eq {}

impl<T> ComputedInput for T where T: Clone + Send + Sync + 'static + std::hash::Hash + Eq {}

pub use clock::{Clock, CoarseClock, ManualClock};
pub use error::Error;
