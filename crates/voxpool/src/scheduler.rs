// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process timers: periodic bulk refresh and latency table persistence.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::credential::pool::CredentialPool;
use crate::selector::EndpointSelector;
use crate::store::Store;

fn timer(period: Duration) -> tokio::time::Interval {
    // First tick one period out; startup already has fresh state.
    let mut tick = tokio::time::interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}

/// Spawn a task that runs `refresh_all` every `period` until `shutdown`.
pub fn spawn_refresh_timer(
    pool: Arc<CredentialPool>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = timer(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            match pool.refresh_all().await {
                Ok(status) => tracing::debug!(
                    success = status.success_count,
                    failed = status.fail_count,
                    "scheduled refresh finished"
                ),
                Err(e) => tracing::warn!(err = %e, "scheduled refresh failed"),
            }
        }
    })
}

/// Spawn a task that writes the latency table every `period`, plus once more
/// on shutdown.
pub fn spawn_latency_persister(
    selector: Arc<EndpointSelector>,
    store: Arc<dyn Store>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = timer(period);
        loop {
            let stopping = tokio::select! {
                _ = shutdown.cancelled() => true,
                _ = tick.tick() => false,
            };
            if let Err(e) = selector.save(store.as_ref()).await {
                tracing::warn!(err = %e, "failed to persist endpoint latency");
            }
            if stopping {
                break;
            }
        }
    })
}
