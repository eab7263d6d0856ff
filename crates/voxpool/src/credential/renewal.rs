// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-credential renewal against the upstream session service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::credential::epoch_ms;
use crate::credential::fingerprint::ClientFingerprint;

#[derive(Debug, thiserror::Error)]
pub enum RenewError {
    #[error("renewal request failed: {0}")]
    Transport(String),
    #[error("renewal rejected ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("renewal response could not be decoded: {0}")]
    Decode(String),
    #[error("renewal response carried no token")]
    MissingToken,
}

/// Exchanges a current session token for a fresh one.
#[async_trait]
pub trait Renewer: Send + Sync {
    async fn renew(&self, token: &str) -> Result<String, RenewError>;
}

#[derive(Debug, Deserialize)]
struct RenewalResponse {
    #[serde(default)]
    data: Option<RenewalData>,
}

#[derive(Debug, Deserialize)]
struct RenewalData {
    #[serde(default)]
    token: Option<String>,
}

/// Renewer that calls the upstream renewal endpoint over HTTPS.
pub struct HttpRenewer {
    url: Url,
    client: Client,
}

impl HttpRenewer {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(url)?;
        crate::ensure_crypto_provider();
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    /// Renewal URL with a freshly generated fingerprint.
    pub fn request_url(&self, fingerprint: &ClientFingerprint) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().extend_pairs(fingerprint.query_pairs(epoch_ms()));
        url
    }
}

#[async_trait]
impl Renewer for HttpRenewer {
    async fn renew(&self, token: &str) -> Result<String, RenewError> {
        let url = self.request_url(&ClientFingerprint::generate());
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Token", token)
            .header("Sec-Fetch-Site", "same-origin")
            .header("Sec-Fetch-Mode", "cors")
            .header("Sec-Fetch-Dest", "empty")
            .send()
            .await
            .map_err(|e| RenewError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| RenewError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(RenewError::Status { status: status.as_u16(), body });
        }
        parse_token(&body)
    }
}

/// Extract `data.token` from a renewal response body.
pub fn parse_token(body: &str) -> Result<String, RenewError> {
    let parsed: RenewalResponse =
        serde_json::from_str(body).map_err(|e| RenewError::Decode(e.to_string()))?;
    parsed
        .data
        .and_then(|d| d.token)
        .filter(|t| !t.trim().is_empty())
        .ok_or(RenewError::MissingToken)
}

#[cfg(test)]
#[path = "renewal_tests.rs"]
mod tests;
