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

use computed_registry_common::ComputedInput;

/// Lifecycle state of a computation, observed (never driven) by the
/// registry.
///
/// ```text
/// Computing ──success──► Consistent ──invalidate()──► Invalidated (terminal)
///     └──────────────────invalidate()─────────────────┘
/// ```
///
/// Monotone: once `Invalidated`, a computation never reports a different
/// state again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    Computing,
    Consistent,
    Invalidated,
}

impl ComputedState {
    pub fn is_invalidated(self) -> bool {
        matches!(self, ComputedState::Invalidated)
    }
}

/// The opaque surface the registry needs from a memoized computation.
///
/// The registry never inspects a computation's payload or its
/// used-by/uses edges; this trait is the entire contract. Implementors
/// are expected to be cheap to clone via `Arc` (the registry only ever
/// holds `Arc<dyn Computed<Input = _>>` / `Weak<..>`).
pub trait Computed: Send + Sync + 'static {
    type Input: ComputedInput;

    /// Current lifecycle state. Must be monotone with respect to
    /// `Invalidated` (see [`ComputedState`]).
    fn state(&self) -> ComputedState;

    /// The immutable fingerprint that identifies this computation's
    /// inputs.
    fn input(&self) -> &Self::Input;

    /// Duration after `last_access_time()` during which the registry
    /// keeps this computation strong-pinned.
    fn keep_alive_time(&self) -> Duration;

    /// Nanoseconds (per the registry's injected `Clock`) since this
    /// computation was last `touch()`ed.
    fn last_access_time(&self) -> u64;

    /// Updates `last_access_time` to "now". Called by the registry on
    /// every `try_get` hit.
    fn touch(&self);

    /// Idempotent transition to `Invalidated`. A real consumer drives
    /// `Unregister` from here; the registry itself only calls this on
    /// the predecessor being replaced in `register`.
    fn invalidate(&self);
}
