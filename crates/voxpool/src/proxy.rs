// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming forward proxy for synthesis requests.
//!
//! One request: validate, normalize text, pick an endpoint and the pooled
//! credentials, forward, stream audio back chunk by chunk, and report the
//! elapsed time to the selector once the stream completes.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::credential::epoch_ms;
use crate::credential::pool::CredentialPool;
use crate::error::ProxyError;
use crate::selector::EndpointSelector;

/// Longest upstream error body echoed back to the client.
const MAX_ERROR_BODY: usize = 512;

/// Inbound synthesis request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeechRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
}

/// JSON body sent to the synthesis endpoint.
#[derive(Debug, Serialize)]
struct UpstreamBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f64,
}

/// Removes parenthesis pairs (full-width and ASCII) around annotations,
/// keeping the enclosed text.
pub struct TextNormalizer {
    fullwidth: Regex,
    ascii: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self { fullwidth: Regex::new(r"（(.+?)）")?, ascii: Regex::new(r"\((.+?)\)")? })
    }

    pub fn normalize(&self, text: &str) -> String {
        let text = self.fullwidth.replace_all(text, "$1");
        let text = self.ascii.replace_all(&text, "$1");
        text.trim().to_owned()
    }
}

#[derive(Debug, Clone)]
pub struct ForwardSettings {
    pub model: String,
    pub default_voice: String,
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Bound on dispatch until response headers.
    pub first_byte_timeout: Duration,
    /// Bound on each stall while reading the body.
    pub read_timeout: Duration,
}

pub struct Forwarder {
    selector: Arc<EndpointSelector>,
    pool: Arc<CredentialPool>,
    client: reqwest::Client,
    normalizer: TextNormalizer,
    settings: ForwardSettings,
}

impl Forwarder {
    pub fn new(
        selector: Arc<EndpointSelector>,
        pool: Arc<CredentialPool>,
        settings: ForwardSettings,
    ) -> anyhow::Result<Self> {
        crate::ensure_crypto_provider();
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .build()?;
        Ok(Self { selector, pool, client, normalizer: TextNormalizer::new()?, settings })
    }

    /// Serve one synthesis request end to end.
    pub async fn forward(&self, req: SpeechRequest) -> Result<Response, ProxyError> {
        let Some(original) = req.text.filter(|t| !t.trim().is_empty()) else {
            tracing::info!("missing text parameter");
            return Err(ProxyError::BadRequest(
                "Missing text parameter. Please provide a \"text\" parameter.".to_owned(),
            ));
        };
        let text = self.normalizer.normalize(&original);
        let voice = req.voice.unwrap_or_else(|| self.settings.default_voice.clone());
        let speed = req.speed.unwrap_or(1.0);
        tracing::debug!(original = %original, processed = %text, "normalized text");

        let endpoint = self.selector.select();
        tracing::info!(endpoint = %endpoint.url, kind = ?endpoint.kind, "selected endpoint");

        let credentials = self.pool.get_active_credentials().await.map_err(|e| {
            tracing::error!(err = %e, "failed to fetch credentials");
            ProxyError::from(e)
        })?;
        if credentials.is_empty() {
            tracing::warn!("no credentials available");
            return Err(ProxyError::NoCredentials);
        }
        let authorization =
            credentials.iter().map(|c| c.token.as_str()).collect::<Vec<_>>().join(",");

        let body = UpstreamBody { model: &self.settings.model, input: &text, voice: &voice, speed };
        let request = self
            .client
            .post(&endpoint.url)
            .bearer_auth(authorization)
            .header(header::USER_AGENT, &self.settings.user_agent)
            .json(&body);

        let started = Instant::now();
        let resp = match tokio::time::timeout(self.settings.first_byte_timeout, request.send()).await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %endpoint.url, err = %e, "upstream request failed");
                return Err(transport_error(e));
            }
            Err(_) => {
                tracing::warn!(endpoint = %endpoint.url, "upstream response timed out");
                return Err(ProxyError::Timeout(format!(
                    "no response within {}ms",
                    self.settings.first_byte_timeout.as_millis()
                )));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let detail = match tokio::time::timeout(self.settings.read_timeout, resp.text()).await {
                Ok(Ok(text)) => truncate(&text, MAX_ERROR_BODY),
                _ => String::new(),
            };
            tracing::warn!(endpoint = %endpoint.url, status = status.as_u16(), "upstream returned error");
            let reason = status.canonical_reason().unwrap_or("");
            let message =
                if detail.is_empty() { reason.to_owned() } else { format!("{reason}: {detail}") };
            return Err(ProxyError::Upstream { status: status.as_u16(), message });
        }

        // Pull the first chunk before committing to a 200 so early transport
        // failures still surface as an error response.
        let mut upstream = resp.bytes_stream().boxed();
        let (first, upstream_done) = match upstream.next().await {
            Some(Ok(chunk)) => (Some(chunk), false),
            Some(Err(e)) => {
                tracing::warn!(endpoint = %endpoint.url, err = %e, "upstream stream failed before first byte");
                return Err(transport_error(e));
            }
            None => (None, true),
        };

        let metered = MeteredStream {
            first,
            upstream,
            upstream_done,
            selector: Arc::clone(&self.selector),
            endpoint: endpoint.url,
            started,
            bytes: 0,
            finished: false,
        };

        let filename = format!("attachment; filename=\"audio_{}.mp3\"", epoch_ms());
        let mut response = Response::new(Body::from_stream(metered));
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        if let Ok(value) = HeaderValue::from_str(&filename) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        Ok(response)
    }
}

fn transport_error(e: reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        ProxyError::Timeout(e.to_string())
    } else {
        ProxyError::UpstreamUnavailable(e.to_string())
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_owned(),
    }
}

/// Passes upstream chunks through unchanged and records latency on a clean
/// end of stream.
///
/// A mid-stream error is forwarded as a body error, which aborts the chunked
/// response; no latency sample is taken. Dropping the stream (client went
/// away) drops the upstream connection with it.
struct MeteredStream {
    first: Option<Bytes>,
    upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    /// The upstream already returned end of stream while peeking.
    upstream_done: bool,
    selector: Arc<EndpointSelector>,
    endpoint: String,
    started: Instant,
    bytes: u64,
    finished: bool,
}

impl MeteredStream {
    fn complete(&mut self) {
        self.finished = true;
        let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.selector.record_latency(&self.endpoint, latency_ms);
        tracing::info!(endpoint = %self.endpoint, bytes = self.bytes, latency_ms, "audio stream completed");
    }
}

impl Stream for MeteredStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if let Some(chunk) = this.first.take() {
            this.bytes += chunk.len() as u64;
            return Poll::Ready(Some(Ok(chunk)));
        }
        if this.upstream_done {
            this.complete();
            return Poll::Ready(None);
        }
        match this.upstream.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                tracing::warn!(endpoint = %this.endpoint, bytes = this.bytes, err = %e, "upstream stream interrupted");
                Poll::Ready(Some(Err(std::io::Error::other(e))))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(endpoint = %self.endpoint, bytes = self.bytes, "client disconnected mid-stream");
        }
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
