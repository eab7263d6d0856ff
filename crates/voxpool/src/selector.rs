// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Latency-weighted endpoint selection.
//!
//! Each endpoint carries an EWMA of observed latency; selection draws an
//! endpoint with probability proportional to `1 / latency`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::store::{Store, StoreResult};

/// Store key for the persisted latency table.
pub const LATENCY_KEY: &str = "endpoint_latency";

/// EWMA smoothing factor.
pub const ALPHA: f64 = 0.2;

/// Floor applied to latencies before they reach the weight formula or the EWMA.
pub const LATENCY_FLOOR_MS: f64 = 1.0;

/// Latency assumed for an endpoint that has no samples yet.
pub const INITIAL_LATENCY_MS: f64 = 1000.0;

struct EndpointState {
    url: String,
    /// `None` until the first sample (or a persisted value) arrives.
    avg_latency_ms: Option<f64>,
    weight: f64,
    samples: u64,
}

impl EndpointState {
    fn effective_latency(&self) -> f64 {
        self.avg_latency_ms.unwrap_or(INITIAL_LATENCY_MS).max(LATENCY_FLOOR_MS)
    }
}

/// How a selection was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    /// Only one endpoint is configured.
    Sole,
    /// The weighted walk landed on an endpoint.
    Weighted,
    /// The walk ran off the end and the last endpoint was taken.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub url: String,
    pub kind: SelectionKind,
}

/// Per-endpoint statistics for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub url: String,
    pub avg_latency_ms: Option<f64>,
    pub weight: f64,
    pub samples: u64,
}

/// Persisted shape of the latency table.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LatencyTable {
    pub endpoints: HashMap<String, f64>,
}

pub struct EndpointSelector {
    endpoints: Mutex<Vec<EndpointState>>,
    fallbacks: AtomicU64,
}

impl EndpointSelector {
    /// Create a selector over a fixed, non-empty, duplicate-free endpoint set.
    pub fn new(urls: Vec<String>) -> anyhow::Result<Self> {
        if urls.is_empty() {
            anyhow::bail!("at least one endpoint is required");
        }
        let mut endpoints: Vec<EndpointState> = Vec::with_capacity(urls.len());
        for url in urls {
            let url = url.trim().to_owned();
            if url.is_empty() {
                anyhow::bail!("empty endpoint URL");
            }
            if endpoints.iter().any(|e| e.url == url) {
                anyhow::bail!("duplicate endpoint: {url}");
            }
            endpoints.push(EndpointState {
                url,
                avg_latency_ms: None,
                weight: 1.0 / INITIAL_LATENCY_MS,
                samples: 0,
            });
        }
        Ok(Self { endpoints: Mutex::new(endpoints), fallbacks: AtomicU64::new(0) })
    }

    /// Pick an endpoint using the thread-local RNG.
    pub fn select(&self) -> Selection {
        self.select_with(|total| rand::rng().random_range(0.0..total))
    }

    /// Pick an endpoint; `draw` receives the total weight and returns a value
    /// in `[0, total)`.
    pub fn select_with(&self, draw: impl FnOnce(f64) -> f64) -> Selection {
        let mut endpoints = self.endpoints.lock();

        if let [only] = endpoints.as_slice() {
            return Selection { url: only.url.clone(), kind: SelectionKind::Sole };
        }

        let mut total = 0.0;
        for ep in endpoints.iter_mut() {
            ep.weight = 1.0 / ep.effective_latency();
            total += ep.weight;
        }

        let target = draw(total);
        let mut running = 0.0;
        for ep in endpoints.iter() {
            running += ep.weight;
            if target < running {
                tracing::debug!(endpoint = %ep.url, weight = ep.weight, "selected endpoint");
                return Selection { url: ep.url.clone(), kind: SelectionKind::Weighted };
            }
        }

        let fallbacks = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
        // The slice has at least two entries here.
        let last = endpoints.last().map(|ep| ep.url.clone()).unwrap_or_default();
        tracing::warn!(
            endpoint = %last,
            fallback = true,
            draw = target,
            total,
            fallbacks,
            "weighted walk found no endpoint, using last"
        );
        Selection { url: last, kind: SelectionKind::Fallback }
    }

    /// Fold an observed latency into the endpoint's moving average.
    ///
    /// Unknown URLs are ignored.
    pub fn record_latency(&self, url: &str, observed_ms: f64) {
        let observed = if observed_ms.is_finite() {
            observed_ms.max(LATENCY_FLOOR_MS)
        } else {
            LATENCY_FLOOR_MS
        };
        let mut endpoints = self.endpoints.lock();
        let Some(ep) = endpoints.iter_mut().find(|e| e.url == url) else {
            tracing::debug!(endpoint = %url, "latency sample for unknown endpoint ignored");
            return;
        };
        let avg = match ep.avg_latency_ms {
            Some(avg) => ewma(avg, observed),
            None => observed,
        };
        ep.avg_latency_ms = Some(avg);
        ep.samples += 1;
        tracing::debug!(endpoint = %url, latency_ms = avg, "updated average latency");
    }

    /// Number of times the fallback path was taken.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.lock().is_empty()
    }

    pub fn stats(&self) -> Vec<EndpointStats> {
        let endpoints = self.endpoints.lock();
        endpoints
            .iter()
            .map(|ep| EndpointStats {
                url: ep.url.clone(),
                avg_latency_ms: ep.avg_latency_ms,
                weight: 1.0 / ep.effective_latency(),
                samples: ep.samples,
            })
            .collect()
    }

    /// Current averages, keyed by URL.
    pub fn table(&self) -> LatencyTable {
        let endpoints = self.endpoints.lock();
        LatencyTable {
            endpoints: endpoints
                .iter()
                .filter_map(|ep| ep.avg_latency_ms.map(|avg| (ep.url.clone(), avg)))
                .collect(),
        }
    }

    /// Seed averages from a previously saved table. Unknown URLs and
    /// non-positive values are skipped.
    pub fn apply_table(&self, table: &LatencyTable) -> usize {
        let mut endpoints = self.endpoints.lock();
        let mut applied = 0;
        for ep in endpoints.iter_mut() {
            if let Some(&avg) = table.endpoints.get(&ep.url) {
                if avg.is_finite() && avg > 0.0 {
                    ep.avg_latency_ms = Some(avg);
                    applied += 1;
                }
            }
        }
        applied
    }

    /// Load the latency table from the store. Missing or corrupt tables leave
    /// the defaults in place.
    pub async fn load(&self, store: &dyn Store) -> StoreResult<usize> {
        let Some(raw) = store.get(LATENCY_KEY).await? else {
            return Ok(0);
        };
        match serde_json::from_str::<LatencyTable>(&raw) {
            Ok(table) => {
                let applied = self.apply_table(&table);
                tracing::info!(applied, "loaded endpoint latency table");
                Ok(applied)
            }
            Err(e) => {
                tracing::warn!(err = %e, "ignoring corrupt endpoint latency table");
                Ok(0)
            }
        }
    }

    /// Write the latency table to the store.
    pub async fn save(&self, store: &dyn Store) -> StoreResult<()> {
        let json = serde_json::to_string(&self.table())
            .map_err(|e| crate::store::StoreError::Corrupt(e.to_string()))?;
        store.set(LATENCY_KEY, &json).await
    }
}

/// `(1 - ALPHA) * avg + ALPHA * observed`.
pub fn ewma(avg: f64, observed: f64) -> f64 {
    (1.0 - ALPHA) * avg + ALPHA * observed
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;
