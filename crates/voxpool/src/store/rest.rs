// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store backed by a Redis-compatible REST service.
//!
//! Every command is a `POST` to the base URL with the command as a JSON
//! array (`["GET", "key"]`) and the reply as `{ "result": ... }` or
//! `{ "error": "..." }`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::store::{Store, StoreError, StoreResult};

/// HTTP client wrapper for the key/value service.
pub struct RestStore {
    base_url: String,
    token: Option<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

impl RestStore {
    pub fn new(base_url: String, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        crate::ensure_crypto_provider();
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_owned(), token, client })
    }

    async fn command(&self, args: &[&str]) -> StoreResult<serde_json::Value> {
        let mut req = self.client.post(&self.base_url).json(&args);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(StoreError::RateLimited(text));
        }
        let reply: Reply = serde_json::from_str(&text).map_err(|_| {
            if status.is_success() {
                StoreError::Corrupt(format!("unparseable reply: {text}"))
            } else {
                StoreError::Unavailable(format!("{status}: {text}"))
            }
        })?;
        if let Some(error) = reply.error {
            return Err(classify_error(error));
        }
        if !status.is_success() {
            return Err(StoreError::Unavailable(format!("{status}: {text}")));
        }
        Ok(reply.result)
    }
}

/// Quota exhaustion is only reported in the error text; map it to the
/// typed variant here so no caller has to look at messages.
fn classify_error(message: String) -> StoreError {
    let lower = message.to_lowercase();
    if lower.contains("limit exceeded") || lower.contains("quota") {
        StoreError::RateLimited(message)
    } else {
        StoreError::Unavailable(message)
    }
}

fn as_opt_string(value: serde_json::Value) -> StoreResult<Option<String>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        other => Ok(Some(other.to_string())),
    }
}

/// Escape glob metacharacters so a literal prefix can be used in `KEYS`.
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl Store for RestStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        as_opt_string(self.command(&["GET", key]).await?)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.command(&["SET", key, value]).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.command(&["DEL", key]).await?;
        Ok(())
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = format!("{}*", glob_escape(prefix));
        let result = self.command(&["KEYS", &pattern]).await?;
        let mut keys: Vec<String> = serde_json::from_value(result)
            .map_err(|e| StoreError::Corrupt(format!("KEYS reply: {e}")))?;
        keys.sort();
        Ok(keys)
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut args = Vec::with_capacity(keys.len() + 1);
        args.push("MGET");
        args.extend(keys.iter().map(String::as_str));
        let result = self.command(&args).await?;
        let values: Vec<serde_json::Value> = serde_json::from_value(result)
            .map_err(|e| StoreError::Corrupt(format!("MGET reply: {e}")))?;
        if values.len() != keys.len() {
            return Err(StoreError::Corrupt(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        values.into_iter().map(as_opt_string).collect()
    }
}

#[cfg(test)]
#[path = "rest_tests.rs"]
mod tests;
