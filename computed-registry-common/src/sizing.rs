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

//! Capacity sizing helpers shared by the registry storage and its
//! pruner-threshold bookkeeping.

/// Smallest power of two greater than or equal to `n`, minimum `1`.
pub fn next_pow2(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    1usize << (usize::BITS - (n - 1).leading_zeros())
}

/// Largest prime number `<= n`, falling back to `2` for tiny `n`.
///
/// Trial division is fine here: this runs once per registry
/// construction and at the end of each prune pass, never on the hot
/// path, and `n` is capped at 16384 by callers.
pub fn largest_prime_leq(n: usize) -> usize {
    fn is_prime(n: usize) -> bool {
        if n < 2 {
            return false;
        }
        if n % 2 == 0 {
            return n == 2;
        }
        let mut d = 3;
        while d * d <= n {
            if n % d == 0 {
                return false;
            }
            d += 2;
        }
        true
    }

    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate -= 1;
    }
    candidate
}

/// Default initial capacity per §4.4:
/// `largest_prime_leq(min(16384, next_pow2(load) * 128))`. `load` is
/// `cpuCount` in the distilled spec's own wording; the registry calls this
/// with `shards * expected_entries` as its generalization of that load
/// term (SPEC_FULL's "Registry storage + API" section).
pub fn default_capacity(load: usize) -> usize {
    largest_prime_leq(16384.min(next_pow2(load) * 128))
}
