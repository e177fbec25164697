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

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::UpdateDelayerConfig;

/// Coalesces the "wait a bit before recomputing" and "back off harder
/// after a run of errors" delays that sit in front of a recomputation.
///
/// A pair of rotating `tokio::sync::watch::Sender<()>` stand in for the
/// upstream's hand-rolled "EndDelay" promise pair: a `watch` channel's
/// subscribers are all released together when the sender is replaced or
/// dropped, which is exactly "the old promise completes after the
/// exchange" — so there is no need for a bespoke promise type here, only
/// the primitive the rest of this crate already reaches for tokio's
/// `sync` module for.
pub struct UpdateDelayer {
    config: UpdateDelayerConfig,
    end_delay: Mutex<Arc<tokio::sync::watch::Sender<()>>>,
    error_end_delay: Mutex<Arc<tokio::sync::watch::Sender<()>>>,
}

impl UpdateDelayer {
    pub fn new(config: UpdateDelayerConfig) -> Self {
        Self {
            config,
            end_delay: Mutex::new(Arc::new(tokio::sync::watch::Sender::new(()))),
            error_end_delay: Mutex::new(Arc::new(tokio::sync::watch::Sender::new(()))),
        }
    }

    /// Waits out the plain recomputation delay, or returns early if
    /// `cancel_delays` fires or `cancel` is triggered. Never returns an
    /// error: cancellation here is a normal outcome, not a failure.
    pub async fn delay(&self, cancel: &CancellationToken) {
        if self.config.delay.is_zero() {
            return;
        }
        self.wait(self.config.delay, &self.end_delay, cancel).await;
    }

    /// Waits out an exponentially-growing (base-`sqrt(2)`) extra delay
    /// after `tries` consecutive failures, capped at
    /// `max_extra_error_delay`. `tries == 0` or `1` both yield
    /// `min_extra_error_delay`.
    pub async fn extra_error_delay(&self, tries: u32, cancel: &CancellationToken) {
        let min = self.config.min_extra_error_delay.as_secs_f64();
        let max = self.config.max_extra_error_delay.as_secs_f64();
        let exponent = tries.saturating_sub(1) as f64 / 2.0;
        let seconds = (min * 2f64.powf(exponent)).min(max);
        let extra = Duration::from_secs_f64(seconds.max(0.0));
        if extra.is_zero() {
            return;
        }
        self.wait(extra, &self.error_end_delay, cancel).await;
    }

    async fn wait(&self, duration: Duration, promise: &Mutex<Arc<tokio::sync::watch::Sender<()>>>, cancel: &CancellationToken) {
        let sender = promise.lock().clone();
        let mut receiver = sender.subscribe();
        drop(sender);
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = receiver.changed() => {}
            _ = cancel.cancelled() => {}
        }
    }

    /// Releases every task currently waiting in [`Self::delay`] /
    /// [`Self::extra_error_delay`].
    ///
    /// `no_delay = false` coalesces a burst of cancellations: the hard
    /// cancel is scheduled `cancel_delays_delay` in the future (so
    /// several calls arriving together collapse into one cancellation).
    /// `no_delay = true` performs it immediately: `end_delay` is swapped
    /// and dropped right away, but `error_end_delay`'s old sender is kept
    /// alive for an extra second before being dropped, damping rapid
    /// error-triggered retries from piling straight back up.
    pub fn cancel_delays(self: &Arc<Self>, no_delay: bool) {
        if !no_delay {
            let this = self.clone();
            let delay = self.config.cancel_delays_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.cancel_delays(true);
            });
            return;
        }

        {
            let mut end_delay = self.end_delay.lock();
            *end_delay = Arc::new(tokio::sync::watch::Sender::new(()));
        }

        let stale_error_delay = {
            let mut error_end_delay = self.error_end_delay.lock();
            std::mem::replace(&mut *error_end_delay, Arc::new(tokio::sync::watch::Sender::new(())))
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(stale_error_delay);
        });
    }
}
