// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32};

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};

use super::*;
use crate::credential::renewal::RenewError;
use crate::store::memory::{InjectedFailure, MemoryStore};

/// Renewer that maps `old` to `old-renewed` unless `old` is listed as revoked.
#[derive(Default)]
struct ScriptedRenewer {
    revoked: Vec<&'static str>,
    delay: Option<Duration>,
    calls: AtomicU32,
}

#[async_trait]
impl Renewer for ScriptedRenewer {
    async fn renew(&self, token: &str) -> Result<String, RenewError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.revoked.contains(&token) {
            return Err(RenewError::Status { status: 401, body: "revoked".to_owned() });
        }
        Ok(format!("{token}-renewed"))
    }
}

fn settings() -> PoolSettings {
    PoolSettings { credential_ttl: Duration::from_secs(3600), status_ttl: Duration::from_secs(60) }
}

fn pool_with(store: &Arc<MemoryStore>, renewer: ScriptedRenewer) -> CredentialPool {
    CredentialPool::new(Arc::clone(store) as Arc<dyn Store>, Arc::new(renewer), settings())
}

async fn seed(store: &MemoryStore, entries: &[(&str, &str)]) -> anyhow::Result<()> {
    for (slot, token) in entries {
        store.set(slot, token).await?;
    }
    Ok(())
}

fn tokens(creds: &[Credential]) -> Vec<&str> {
    creds.iter().map(|c| c.token.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn snapshot_is_reused_within_window_and_reloaded_after() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("token:1", "alpha")]).await?;
    let pool = pool_with(&store, ScriptedRenewer::default());

    let first = pool.get_active_credentials().await?;
    let reads = store.reads();

    // Out-of-band write is invisible while the snapshot is fresh.
    store.set("token:2", "beta").await?;
    tokio::time::advance(Duration::from_secs(3599)).await;
    let second = pool.get_active_credentials().await?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.reads(), reads);

    tokio::time::advance(Duration::from_secs(2)).await;
    let third = pool.get_active_credentials().await?;
    assert_eq!(tokens(&third), ["alpha", "beta"]);
    assert!(store.reads() > reads);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_limited_store_serves_stale_snapshot() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("token:1", "alpha")]).await?;
    let pool = pool_with(&store, ScriptedRenewer::default());
    pool.get_active_credentials().await?;

    tokio::time::advance(Duration::from_secs(7200)).await;
    store.inject_failure(Some(InjectedFailure::RateLimited));
    let stale = pool.get_active_credentials().await?;
    assert_eq!(tokens(&stale), ["alpha"]);
    Ok(())
}

#[tokio::test]
async fn rate_limited_store_without_snapshot_fails() {
    let store = Arc::new(MemoryStore::new());
    store.inject_failure(Some(InjectedFailure::RateLimited));
    let pool = pool_with(&store, ScriptedRenewer::default());
    let err = pool.get_active_credentials().await.err();
    assert!(err.is_some_and(|e| e.is_rate_limited()));
}

#[tokio::test(start_paused = true)]
async fn other_store_errors_are_not_masked() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("token:1", "alpha")]).await?;
    let pool = pool_with(&store, ScriptedRenewer::default());
    pool.get_active_credentials().await?;

    tokio::time::advance(Duration::from_secs(7200)).await;
    store.inject_failure(Some(InjectedFailure::Unavailable));
    let err = pool.get_active_credentials().await.err();
    assert!(matches!(err, Some(StoreError::Unavailable(_))));
    Ok(())
}

#[tokio::test]
async fn add_credential_invalidates_snapshot() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("token:1", "alpha")]).await?;
    let pool = pool_with(&store, ScriptedRenewer::default());
    assert_eq!(pool.get_active_credentials().await?.len(), 1);

    assert_eq!(pool.add_credential("beta").await?, 2);
    let creds = pool.get_active_credentials().await?;
    assert_eq!(tokens(&creds), ["alpha", "beta"]);
    assert!(creds[1].slot.starts_with(TOKEN_PREFIX));
    Ok(())
}

#[tokio::test]
async fn invalidated_snapshot_still_backs_rate_limited_reads() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("token:1", "alpha")]).await?;
    let pool = pool_with(&store, ScriptedRenewer::default());
    pool.get_active_credentials().await?;
    pool.add_credential("beta").await?;

    pool.invalidate(|_| {});
    store.inject_failure(Some(InjectedFailure::RateLimited));
    assert_eq!(tokens(&pool.get_active_credentials().await?), ["alpha", "beta"]);
    Ok(())
}

/// Store wrapper that can hold one batch read open after it has read, and
/// can fail all reads while writes still succeed.
struct GatedStore {
    inner: Arc<MemoryStore>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    entered: Notify,
    fail_reads: AtomicBool,
}

impl GatedStore {
    fn new(inner: &Arc<MemoryStore>) -> Self {
        Self {
            inner: Arc::clone(inner),
            gate: Mutex::new(None),
            entered: Notify::new(),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Hold the next `get_many` until the returned sender fires.
    fn arm(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock() = Some(rx);
        tx
    }

    fn check_reads(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("read replica down".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for GatedStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_reads()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_reads()?;
        self.inner.list_keys_by_prefix(prefix).await
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.check_reads()?;
        let values = self.inner.get_many(keys).await?;
        let gate = self.gate.lock().take();
        if let Some(release) = gate {
            self.entered.notify_one();
            release.await.ok();
        }
        Ok(values)
    }
}

fn gated_pool(store: &Arc<GatedStore>) -> Arc<CredentialPool> {
    Arc::new(CredentialPool::new(
        Arc::clone(store) as Arc<dyn Store>,
        Arc::new(ScriptedRenewer::default()),
        settings(),
    ))
}

#[tokio::test]
async fn load_started_before_a_write_does_not_clobber_it() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryStore::new());
    seed(&memory, &[("token:1", "alpha")]).await?;
    let store = Arc::new(GatedStore::new(&memory));
    let pool = gated_pool(&store);

    // Reader loads [alpha] and then stalls before installing it.
    let release = store.arm();
    let reader = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.get_active_credentials().await }
    });
    store.entered.notified().await;

    assert_eq!(pool.add_credential("beta").await?, 2);
    release.send(()).ok();
    assert_eq!(tokens(&reader.await??), ["alpha"]);

    // The retained snapshot still carries the write.
    memory.inject_failure(Some(InjectedFailure::RateLimited));
    assert_eq!(tokens(&pool.get_active_credentials().await?), ["alpha", "beta"]);
    Ok(())
}

#[tokio::test]
async fn add_credential_survives_failed_reload() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryStore::new());
    seed(&memory, &[("token:1", "alpha")]).await?;
    let store = Arc::new(GatedStore::new(&memory));
    let pool = gated_pool(&store);
    pool.get_active_credentials().await?;

    store.fail_reads.store(true, Ordering::Relaxed);
    assert_eq!(pool.add_credential("beta").await?, 2);
    assert_eq!(memory.list_keys_by_prefix(TOKEN_PREFIX).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn add_credential_without_snapshot_survives_failed_reload() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryStore::new());
    let store = Arc::new(GatedStore::new(&memory));
    let pool = gated_pool(&store);

    store.fail_reads.store(true, Ordering::Relaxed);
    assert_eq!(pool.add_credential("beta").await?, 1);
    let slots = memory.list_keys_by_prefix(TOKEN_PREFIX).await?;
    assert_eq!(memory.get_many(&slots).await?, [Some("beta".to_owned())]);
    Ok(())
}

#[tokio::test]
async fn submit_mints_and_stores() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let pool = pool_with(&store, ScriptedRenewer::default());
    let submitted = pool.submit("seed").await?;
    assert_eq!(submitted.token, "seed-renewed");
    assert_eq!(submitted.count, 1);
    assert_eq!(store.list_keys_by_prefix(TOKEN_PREFIX).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_mint_stores_nothing() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let pool =
        pool_with(&store, ScriptedRenewer { revoked: vec!["dead"], ..Default::default() });
    let err = pool.submit("dead").await.err();
    assert!(matches!(err, Some(ProxyError::Upstream { .. })));
    assert!(store.list_keys_by_prefix(TOKEN_PREFIX).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn refresh_counts_partial_failures_and_keeps_old_values() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("token:1", "a"), ("token:2", "b"), ("token:3", "c"), ("token:4", "d")]).await?;
    let pool =
        pool_with(&store, ScriptedRenewer { revoked: vec!["b", "d"], ..Default::default() });
    pool.get_active_credentials().await?;

    let status = pool.refresh_all().await?;
    assert_eq!((status.success_count, status.fail_count), (2, 2));

    let stored: HashMap<String, Option<String>> = {
        let keys = store.list_keys_by_prefix(TOKEN_PREFIX).await?;
        let values = store.get_many(&keys).await?;
        keys.into_iter().zip(values).collect()
    };
    assert_eq!(stored["token:1"].as_deref(), Some("a-renewed"));
    assert_eq!(stored["token:2"].as_deref(), Some("b"));
    assert_eq!(stored["token:3"].as_deref(), Some("c-renewed"));
    assert_eq!(stored["token:4"].as_deref(), Some("d"));

    // Snapshot was invalidated, so the next read sees renewed values.
    assert_eq!(tokens(&pool.get_active_credentials().await?), ["a-renewed", "b", "c-renewed", "d"]);

    let persisted = store.get(REFRESH_STATUS_KEY).await?.unwrap_or_default();
    let persisted: RefreshStatus = serde_json::from_str(&persisted)?;
    assert_eq!(persisted, status);
    Ok(())
}

#[tokio::test]
async fn refresh_over_empty_pool_records_zero_counts() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let pool = pool_with(&store, ScriptedRenewer::default());
    let status = pool.refresh_all().await?;
    assert_eq!((status.success_count, status.fail_count), (0, 0));
    Ok(())
}

#[tokio::test]
async fn refresh_aborts_when_store_is_down() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("token:1", "a")]).await?;
    let pool = pool_with(&store, ScriptedRenewer::default());
    store.inject_failure(Some(InjectedFailure::Unavailable));
    assert!(pool.refresh_all().await.is_err());

    store.inject_failure(None);
    assert_eq!(store.get(REFRESH_STATUS_KEY).await?, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_refresh_triggers_are_coalesced() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("token:1", "a"), ("token:2", "b")]).await?;
    let renewer =
        Arc::new(ScriptedRenewer { delay: Some(Duration::from_millis(100)), ..Default::default() });
    let pool = CredentialPool::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&renewer) as Arc<dyn Renewer>,
        settings(),
    );

    let (first, second) = tokio::join!(pool.refresh_all(), pool.refresh_all());
    let (first, second) = (first?, second?);
    assert_eq!(first, second);
    assert_eq!(first.success_count, 2);
    assert_eq!(renewer.calls.load(Ordering::Relaxed), 2);
    assert_eq!(store.get("token:1").await?.as_deref(), Some("a-renewed"));
    Ok(())
}

#[tokio::test]
async fn refresh_status_is_absent_before_first_run() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let pool = pool_with(&store, ScriptedRenewer::default());
    assert_eq!(pool.get_refresh_status().await?, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_status_is_cached_briefly() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let pool = pool_with(&store, ScriptedRenewer::default());
    let status = RefreshStatus { timestamp_ms: 1, success_count: 3, fail_count: 1 };
    store.set(REFRESH_STATUS_KEY, &serde_json::to_string(&status)?).await?;

    assert_eq!(pool.get_refresh_status().await?, Some(status.clone()));

    let newer = RefreshStatus { timestamp_ms: 2, success_count: 4, fail_count: 0 };
    store.set(REFRESH_STATUS_KEY, &serde_json::to_string(&newer)?).await?;
    assert_eq!(pool.get_refresh_status().await?, Some(status.clone()));

    tokio::time::advance(Duration::from_secs(61)).await;
    store.inject_failure(Some(InjectedFailure::RateLimited));
    assert_eq!(pool.get_refresh_status().await?, Some(status));

    store.inject_failure(None);
    assert_eq!(pool.get_refresh_status().await?, Some(newer));
    Ok(())
}
