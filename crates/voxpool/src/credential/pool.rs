// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential pool manager: snapshot cache, submission, and bulk renewal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::credential::renewal::Renewer;
use crate::credential::{
    epoch_ms, new_slot, redact, Credential, RefreshStatus, REFRESH_STATUS_KEY, TOKEN_PREFIX,
};
use crate::error::ProxyError;
use crate::store::{Store, StoreError, StoreResult};

/// Cache freshness windows.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub credential_ttl: Duration,
    pub status_ttl: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self { credential_ttl: Duration::from_secs(3600), status_ttl: Duration::from_secs(60) }
    }
}

/// Time-bounded copy of the pool. `fetched_at == None` means invalidated;
/// the contents are still kept as a rate-limit fallback.
struct Snapshot {
    credentials: Arc<Vec<Credential>>,
    fetched_at: Option<Instant>,
}

struct StatusCache {
    status: Option<RefreshStatus>,
    fetched_at: Instant,
}

/// Result of a credential submission.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub token: String,
    pub count: usize,
}

pub struct CredentialPool {
    store: Arc<dyn Store>,
    renewer: Arc<dyn Renewer>,
    settings: PoolSettings,
    snapshot: Mutex<Option<Snapshot>>,
    /// Bumped on every invalidation so a reload that raced with a write
    /// does not install pre-write contents as fresh.
    generation: AtomicU64,
    status: Mutex<Option<StatusCache>>,
    /// Serializes bulk refresh cycles.
    refresh_gate: tokio::sync::Mutex<()>,
    completed_runs: AtomicU64,
    last_run: Mutex<Option<RefreshStatus>>,
}

impl CredentialPool {
    pub fn new(store: Arc<dyn Store>, renewer: Arc<dyn Renewer>, settings: PoolSettings) -> Self {
        Self {
            store,
            renewer,
            settings,
            snapshot: Mutex::new(None),
            generation: AtomicU64::new(0),
            status: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            completed_runs: AtomicU64::new(0),
            last_run: Mutex::new(None),
        }
    }

    /// All pooled credentials, from the snapshot when fresh.
    ///
    /// A rate-limited store falls back to the last loaded snapshot; any other
    /// store error propagates.
    pub async fn get_active_credentials(&self) -> StoreResult<Arc<Vec<Credential>>> {
        if let Some(fresh) = self.fresh_snapshot() {
            return Ok(fresh);
        }
        self.reload().await
    }

    fn fresh_snapshot(&self) -> Option<Arc<Vec<Credential>>> {
        let snapshot = self.snapshot.lock();
        let snap = snapshot.as_ref()?;
        let fetched_at = snap.fetched_at?;
        (fetched_at.elapsed() < self.settings.credential_ttl).then(|| Arc::clone(&snap.credentials))
    }

    fn last_snapshot(&self) -> Option<Arc<Vec<Credential>>> {
        self.snapshot.lock().as_ref().map(|s| Arc::clone(&s.credentials))
    }

    /// Load from the store and install the result as the fresh snapshot.
    async fn reload(&self) -> StoreResult<Arc<Vec<Credential>>> {
        let generation = self.generation.load(Ordering::Acquire);
        match self.load_from_store().await {
            Ok(credentials) => {
                let credentials = Arc::new(credentials);
                let mut snapshot = self.snapshot.lock();
                if self.generation.load(Ordering::Acquire) == generation {
                    *snapshot = Some(Snapshot {
                        credentials: Arc::clone(&credentials),
                        fetched_at: Some(Instant::now()),
                    });
                    tracing::debug!(count = credentials.len(), "credential snapshot loaded");
                } else if snapshot.is_none() {
                    *snapshot =
                        Some(Snapshot { credentials: Arc::clone(&credentials), fetched_at: None });
                } else {
                    // A write landed mid-load; the amended snapshot is newer.
                    tracing::debug!("discarding credential load that raced with a write");
                }
                Ok(credentials)
            }
            Err(e) if e.is_rate_limited() => match self.last_snapshot() {
                Some(stale) => {
                    tracing::warn!(err = %e, count = stale.len(), "store rate limited, serving stale credentials");
                    Ok(stale)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn load_from_store(&self) -> StoreResult<Vec<Credential>> {
        tracing::info!("fetching credentials from store");
        let slots = self.store.list_keys_by_prefix(TOKEN_PREFIX).await?;
        let values = self.store.get_many(&slots).await?;
        Ok(slots
            .into_iter()
            .zip(values)
            .filter_map(|(slot, token)| {
                let token = token.filter(|t| !t.trim().is_empty())?;
                Some(Credential { slot, token })
            })
            .collect())
    }

    /// Mark the snapshot stale, optionally amending the retained contents.
    /// Returns the size of the amended snapshot, if there was one.
    fn invalidate(&self, amend: impl FnOnce(&mut Vec<Credential>)) -> Option<usize> {
        let mut snapshot = self.snapshot.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let snap = snapshot.as_mut()?;
        let mut credentials = snap.credentials.as_ref().clone();
        amend(&mut credentials);
        let count = credentials.len();
        snap.credentials = Arc::new(credentials);
        snap.fetched_at = None;
        Some(count)
    }

    /// Store `token` under a fresh slot. Returns the updated pool size.
    ///
    /// Once the write succeeds the credential counts as added; a failed
    /// follow-up reload falls back to the amended snapshot for the count.
    pub async fn add_credential(&self, token: &str) -> StoreResult<usize> {
        let slot = new_slot();
        self.store.set(&slot, token).await?;
        tracing::info!(slot = %slot, token = %redact(token), "credential stored");
        let added = Credential { slot, token: token.to_owned() };
        let amended = self.invalidate(|creds| creds.push(added));
        match self.get_active_credentials().await {
            Ok(credentials) => Ok(credentials.len()),
            Err(e) => {
                tracing::warn!(err = %e, "reload after credential write failed");
                Ok(amended.unwrap_or(1))
            }
        }
    }

    /// Mint a new credential from `prior` via the renewal call and store it.
    pub async fn submit(&self, prior: &str) -> Result<Submitted, ProxyError> {
        let token = self.renewer.renew(prior).await.map_err(|e| {
            tracing::warn!(token = %redact(prior), err = %e, "failed to mint credential");
            ProxyError::Upstream { status: 502, message: format!("failed to refresh token: {e}") }
        })?;
        let count = self.add_credential(&token).await?;
        Ok(Submitted { token, count })
    }

    /// Renew every stored credential in place and record the outcome.
    ///
    /// A trigger that arrives while a cycle is running waits for it and
    /// returns that cycle's status.
    pub async fn refresh_all(&self) -> StoreResult<RefreshStatus> {
        let runs_before = self.completed_runs.load(Ordering::Acquire);
        let _gate = match self.refresh_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                tracing::info!("bulk refresh already running, waiting for it");
                let gate = self.refresh_gate.lock().await;
                if self.completed_runs.load(Ordering::Acquire) > runs_before {
                    let last = self.last_run.lock().clone();
                    if let Some(status) = last {
                        return Ok(status);
                    }
                }
                gate
            }
        };

        tracing::info!("starting bulk credential refresh");
        let outcome = self.renew_each().await;
        self.invalidate(|_| {});
        let (success_count, fail_count) = outcome?;

        let status = RefreshStatus { timestamp_ms: epoch_ms(), success_count, fail_count };
        tracing::info!(success = success_count, failed = fail_count, "bulk credential refresh completed");

        *self.last_run.lock() = Some(status.clone());
        *self.status.lock() =
            Some(StatusCache { status: Some(status.clone()), fetched_at: Instant::now() });
        self.completed_runs.fetch_add(1, Ordering::AcqRel);

        let json = serde_json::to_string(&status).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        match self.store.set(REFRESH_STATUS_KEY, &json).await {
            Ok(()) => {}
            Err(e) if e.is_rate_limited() => {
                tracing::warn!(err = %e, "store rate limited, refresh status kept in memory only");
            }
            Err(e) => return Err(e),
        }
        Ok(status)
    }

    async fn renew_each(&self) -> StoreResult<(u32, u32)> {
        let credentials = self.reload().await?;
        tracing::info!(count = credentials.len(), "credentials to refresh");

        let (mut success, mut failed) = (0u32, 0u32);
        for cred in credentials.iter() {
            let token = match self.renewer.renew(&cred.token).await {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(slot = %cred.slot, err = %e, "credential renewal failed");
                    failed += 1;
                    continue;
                }
            };
            match self.store.set(&cred.slot, &token).await {
                Ok(()) => {
                    tracing::info!(slot = %cred.slot, "credential renewed");
                    success += 1;
                }
                Err(e) if e.is_rate_limited() => {
                    tracing::warn!(slot = %cred.slot, err = %e, "renewed credential not persisted");
                    failed += 1;
                }
                Err(e) => {
                    tracing::error!(slot = %cred.slot, err = %e, "store failed, aborting refresh");
                    return Err(e);
                }
            }
        }
        Ok((success, failed))
    }

    /// Most recent refresh status, served from a short-lived cache.
    pub async fn get_refresh_status(&self) -> StoreResult<Option<RefreshStatus>> {
        {
            let cache = self.status.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.settings.status_ttl {
                    return Ok(cached.status.clone());
                }
            }
        }

        let status = match self.store.get(REFRESH_STATUS_KEY).await {
            Ok(Some(raw)) => Some(
                serde_json::from_str::<RefreshStatus>(&raw)
                    .map_err(|e| StoreError::Corrupt(format!("refresh status: {e}")))?,
            ),
            Ok(None) => None,
            Err(e) if e.is_rate_limited() => {
                let stale = self.status.lock().as_ref().map(|c| c.status.clone());
                return match stale {
                    Some(status) => {
                        tracing::warn!(err = %e, "store rate limited, serving stale refresh status");
                        Ok(status)
                    }
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        };
        *self.status.lock() = Some(StatusCache { status: status.clone(), fetched_at: Instant::now() });
        Ok(status)
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
