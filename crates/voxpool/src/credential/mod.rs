// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential pooling: a set of upstream session tokens kept in the durable
//! store, served from a time-bounded snapshot, and renewed in bulk.
//!
//! Each token lives in its own slot (`token:<id>`). Renewal overwrites the
//! value in place; slots are never removed automatically.

pub mod fingerprint;
pub mod pool;
pub mod renewal;

use serde::{Deserialize, Serialize};

/// Store key prefix for credential slots.
pub const TOKEN_PREFIX: &str = "token:";

/// Store key for the latest refresh status record.
pub const REFRESH_STATUS_KEY: &str = "last_token_refresh";

/// One pooled upstream session token and the slot it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub slot: String,
    pub token: String,
}

/// Outcome of the most recent bulk refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshStatus {
    /// Completion time as epoch millis.
    pub timestamp_ms: u64,
    pub success_count: u32,
    pub fail_count: u32,
}

/// Allocate a fresh slot key. Keys sort by creation time.
pub fn new_slot() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{TOKEN_PREFIX}{:013}-{}", epoch_ms(), &suffix[..8])
}

/// Short, log-safe form of a token.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    if prefix.len() < token.len() {
        format!("{prefix}…")
    } else {
        "…".to_owned()
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
