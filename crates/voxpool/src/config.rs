// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Default upstream session renewal endpoint.
pub const DEFAULT_RENEWAL_URL: &str = "https://hailuoai.com/v1/api/user/renewal";

/// Default synthetic user agent sent on synthesis calls.
pub const DEFAULT_USER_AGENT: &str = "Apifox/1.0.0 (https://apifox.com)";

/// Durable store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    /// Process memory only; nothing survives a restart.
    Memory,
    /// JSON document on local disk.
    File,
    /// Remote key/value service over HTTP.
    Rest,
}

/// Configuration for the voxpool proxy.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "voxpool", version, about = "Credential-pooling speech synthesis proxy")]
pub struct ProxyConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "VOXPOOL_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 3000, env = "VOXPOOL_PORT")]
    pub port: u16,

    /// Upstream synthesis endpoint URLs (comma-separated).
    #[arg(long, env = "VOXPOOL_ENDPOINTS", value_delimiter = ',', required = true)]
    pub endpoints: Vec<String>,

    /// Durable store backend.
    #[arg(long, value_enum, default_value_t = StoreKind::File, env = "VOXPOOL_STORE")]
    pub store: StoreKind,

    /// JSON file for the `file` store backend. Defaults to `<state dir>/store.json`.
    #[arg(long, env = "VOXPOOL_STORE_PATH")]
    pub store_path: Option<PathBuf>,

    /// Base URL of the REST key/value service (`rest` backend).
    #[arg(long, env = "VOXPOOL_KV_URL")]
    pub kv_url: Option<String>,

    /// Bearer token for the REST key/value service.
    #[arg(long, env = "VOXPOOL_KV_TOKEN")]
    pub kv_token: Option<String>,

    /// Total timeout for one REST key/value command in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "VOXPOOL_KV_TIMEOUT_MS")]
    pub kv_timeout_ms: u64,

    /// Upstream credential renewal URL.
    #[arg(long, default_value = DEFAULT_RENEWAL_URL, env = "VOXPOOL_RENEWAL_URL")]
    pub renewal_url: String,

    /// Model identifier sent to the synthesis endpoint.
    #[arg(long, default_value = "hailuo", env = "VOXPOOL_MODEL")]
    pub model: String,

    /// Voice used when a request does not name one.
    #[arg(long, default_value = "keli_hailuo", env = "VOXPOOL_DEFAULT_VOICE")]
    pub default_voice: String,

    /// User agent sent on synthesis calls.
    #[arg(long, default_value = DEFAULT_USER_AGENT, env = "VOXPOOL_USER_AGENT")]
    pub user_agent: String,

    /// Credential snapshot freshness window in milliseconds.
    #[arg(long, default_value_t = 3_600_000, env = "VOXPOOL_CREDENTIAL_CACHE_MS")]
    pub credential_cache_ms: u64,

    /// Refresh status cache freshness window in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "VOXPOOL_STATUS_CACHE_MS")]
    pub status_cache_ms: u64,

    /// Timeout for a single credential renewal call in milliseconds.
    #[arg(long, default_value_t = 15_000, env = "VOXPOOL_RENEWAL_TIMEOUT_MS")]
    pub renewal_timeout_ms: u64,

    /// Connect timeout for upstream synthesis calls in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "VOXPOOL_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// Time allowed until the first audio bytes arrive, in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "VOXPOOL_FIRST_BYTE_TIMEOUT_MS")]
    pub first_byte_timeout_ms: u64,

    /// Max stall between streamed chunks in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "VOXPOOL_READ_TIMEOUT_MS")]
    pub read_timeout_ms: u64,

    /// In-process bulk refresh interval in milliseconds (0 disables).
    #[arg(long, default_value_t = 0, env = "VOXPOOL_REFRESH_INTERVAL_MS")]
    pub refresh_interval_ms: u64,

    /// Latency table persistence interval in milliseconds (0 disables).
    #[arg(long, default_value_t = 30_000, env = "VOXPOOL_LATENCY_PERSIST_MS")]
    pub latency_persist_ms: u64,
}

impl ProxyConfig {
    /// Config with every knob at its default, pointing at `endpoints`.
    pub fn with_endpoints(endpoints: Vec<String>) -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 3000,
            endpoints,
            store: StoreKind::Memory,
            store_path: None,
            kv_url: None,
            kv_token: None,
            kv_timeout_ms: 10_000,
            renewal_url: DEFAULT_RENEWAL_URL.to_owned(),
            model: "hailuo".to_owned(),
            default_voice: "keli_hailuo".to_owned(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            credential_cache_ms: 3_600_000,
            status_cache_ms: 60_000,
            renewal_timeout_ms: 15_000,
            connect_timeout_ms: 10_000,
            first_byte_timeout_ms: 60_000,
            read_timeout_ms: 30_000,
            refresh_interval_ms: 0,
            latency_persist_ms: 30_000,
        }
    }

    pub fn credential_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.credential_cache_ms)
    }

    pub fn status_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.status_cache_ms)
    }

    pub fn kv_timeout(&self) -> Duration {
        Duration::from_millis(self.kv_timeout_ms)
    }

    pub fn renewal_timeout(&self) -> Duration {
        Duration::from_millis(self.renewal_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn first_byte_timeout(&self) -> Duration {
        Duration::from_millis(self.first_byte_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// `None` when the in-process refresh timer is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then(|| Duration::from_millis(self.refresh_interval_ms))
    }

    /// `None` when latency persistence is disabled.
    pub fn latency_persist_interval(&self) -> Option<Duration> {
        (self.latency_persist_ms > 0).then(|| Duration::from_millis(self.latency_persist_ms))
    }

    /// Resolve the file store path, falling back to the state directory.
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| state_dir().join("store.json"))
    }
}

/// Resolve the state directory for proxy data.
///
/// Checks `VOXPOOL_STATE_DIR`, then `$XDG_STATE_HOME/voxpool`,
/// then `$HOME/.local/state/voxpool`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("VOXPOOL_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("voxpool");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/voxpool");
    }
    PathBuf::from(".voxpool")
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parses_comma_separated_endpoints() -> anyhow::Result<()> {
        let config = ProxyConfig::try_parse_from([
            "voxpool",
            "--endpoints",
            "http://a:8000/v1/audio/speech,http://b:8000/v1/audio/speech",
            "--store",
            "memory",
        ])?;
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.credential_cache_ttl(), Duration::from_secs(3600));
        assert!(config.refresh_interval().is_none());
        Ok(())
    }

    #[test]
    fn kv_timeout_is_separate_from_connect_timeout() -> anyhow::Result<()> {
        let config = ProxyConfig::try_parse_from([
            "voxpool",
            "--endpoints",
            "http://a",
            "--kv-timeout-ms",
            "2500",
        ])?;
        assert_eq!(config.kv_timeout(), Duration::from_millis(2500));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(
            ProxyConfig::with_endpoints(vec![]).kv_timeout(),
            Duration::from_secs(10)
        );
        Ok(())
    }

    #[test]
    fn endpoints_are_required() {
        assert!(ProxyConfig::try_parse_from(["voxpool"]).is_err());
    }
}
