// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable key/value storage used for credentials, refresh status, and the
//! endpoint latency table.
//!
//! Backends classify quota exhaustion as [`StoreError::RateLimited`] so the
//! credential pool can serve a stale snapshot instead of failing.

pub mod file;
pub mod memory;
pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ProxyConfig, StoreKind};
pub use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Key/value access consumed by the credential pool and endpoint selector.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Keys starting with `prefix`, sorted ascending.
    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Fetch several keys in one go. Result is positionally aligned with `keys`.
    ///
    /// The default issues one `get` per key; backends with a batch primitive
    /// override it.
    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }
}

/// Build the store backend selected by `config`.
pub fn from_config(config: &ProxyConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.store {
        StoreKind::Memory => Arc::new(memory::MemoryStore::new()),
        StoreKind::File => {
            let store = file::FileStore::open(config.resolved_store_path())?;
            tracing::info!(path = %store.path().display(), "using file store");
            Arc::new(store)
        }
        StoreKind::Rest => {
            let url = config
                .kv_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--kv-url is required for the rest store"))?;
            Arc::new(rest::RestStore::new(url, config.kv_token.clone(), config.kv_timeout())?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    fn config(store: StoreKind) -> ProxyConfig {
        let mut config = ProxyConfig::with_endpoints(vec!["http://a".to_owned()]);
        config.store = store;
        config
    }

    #[test]
    fn rest_store_requires_url() {
        assert!(from_config(&config(StoreKind::Rest)).is_err());
    }

    #[tokio::test]
    async fn rest_store_gives_up_after_kv_timeout() -> anyhow::Result<()> {
        // Accepts and reads the command but never replies.
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
                });
            }
        });

        let mut config = config(StoreKind::Rest);
        config.kv_url = Some(format!("http://{addr}"));
        config.kv_timeout_ms = 200;
        config.connect_timeout_ms = 60_000;
        let store = from_config(&config)?;

        let result = tokio::time::timeout(Duration::from_secs(5), store.get("token:1")).await;
        assert!(matches!(result, Ok(Err(StoreError::Unavailable(_)))), "{result:?}");
        Ok(())
    }

    #[tokio::test]
    async fn file_store_opens_at_configured_path() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config(StoreKind::File);
        config.store_path = Some(dir.path().join("kv.json"));

        let store = from_config(&config)?;
        store.set("token:1", "a").await?;
        assert!(dir.path().join("kv.json").exists());
        Ok(())
    }
}
