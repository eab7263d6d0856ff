// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process store. Used with `--store memory` and as the test double for
//! the durable backends.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::store::{Store, StoreError, StoreResult};

/// Failure the store is told to return for every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    RateLimited,
    Unavailable,
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    failure: Mutex<Option<InjectedFailure>>,
    reads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `failure` (or succeed again with `None`).
    pub fn inject_failure(&self, failure: Option<InjectedFailure>) {
        *self.failure.lock() = failure;
    }

    /// Number of read calls (`get`, `get_many`, `list_keys_by_prefix`) served.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn check(&self) -> StoreResult<()> {
        match *self.failure.lock() {
            Some(InjectedFailure::RateLimited) => {
                Err(StoreError::RateLimited("max requests limit exceeded".to_owned()))
            }
            Some(InjectedFailure::Unavailable) => {
                Err(StoreError::Unavailable("connection refused".to_owned()))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let entries = self.entries.lock();
        Ok(entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let entries = self.entries.lock();
        Ok(keys.iter().map(|k| entries.get(k).cloned()).collect())
    }
}
