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

/// Error taxonomy for the registry and its collaborators.
///
/// Only `WrongComputedState`, `InvalidConfiguration` and `Reentrant` are
/// ever surfaced to a caller; `Cancelled` is swallowed inside the update
/// delayer and the lock set's own cancellation handling.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// `unregister` was called on a computation whose state is not
    /// `Invalidated`. Removing a reachable entry would break the
    /// at-most-one-live-per-key invariant relied on by consumers.
    #[error("unregister called on a computation that is not Invalidated")]
    WrongComputedState,

    /// Surfaced at construction time for malformed configuration
    /// (e.g. zero shards, zero pool capacity).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    /// Cooperative cancellation of an in-flight wait. Propagated from the
    /// async lock set; swallowed by the update delayer.
    #[error("operation cancelled")]
    Cancelled,

    /// The same logical task attempted to acquire a per-input lock it
    /// already holds.
    #[error("reentrant lock acquisition")]
    Reentrant,
}
