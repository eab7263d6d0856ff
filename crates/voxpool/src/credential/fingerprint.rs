// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synthetic browser fingerprint sent with renewal calls.
//!
//! The upstream renewal endpoint expects the query parameters a web client
//! would send. Identifiers are generated fresh for every call; the static
//! fields live here so they can change without touching the renewal flow.

use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of the generated device identifier.
pub const DEVICE_ID_LEN: usize = 26;

#[derive(Debug, Clone)]
pub struct ClientFingerprint {
    /// Random UUIDv4 session identifier.
    pub uuid: String,
    /// Random lowercase alphanumeric device identifier.
    pub device_id: String,
    pub device_platform: &'static str,
    pub app_id: &'static str,
    pub version_code: &'static str,
    pub os_name: &'static str,
    pub browser_name: &'static str,
    pub server_version: &'static str,
    pub device_memory: u32,
    pub cpu_core_num: u32,
    pub browser_language: &'static str,
    pub browser_platform: &'static str,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl ClientFingerprint {
    /// Desktop Chrome on Windows with fresh identifiers.
    pub fn generate() -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            device_id: generate_device_id(),
            device_platform: "web",
            app_id: "3001",
            version_code: "22200",
            os_name: "Windows",
            browser_name: "chrome",
            server_version: "101",
            device_memory: 8,
            cpu_core_num: 12,
            browser_language: "en",
            browser_platform: "Win32",
            screen_width: 1536,
            screen_height: 864,
        }
    }

    /// Query parameters in the order a browser sends them, ending with the
    /// request timestamp.
    pub fn query_pairs(&self, unix_ms: u64) -> Vec<(&'static str, String)> {
        vec![
            ("device_platform", self.device_platform.to_owned()),
            ("app_id", self.app_id.to_owned()),
            ("uuid", self.uuid.clone()),
            ("device_id", self.device_id.clone()),
            ("version_code", self.version_code.to_owned()),
            ("os_name", self.os_name.to_owned()),
            ("browser_name", self.browser_name.to_owned()),
            ("server_version", self.server_version.to_owned()),
            ("device_memory", self.device_memory.to_string()),
            ("cpu_core_num", self.cpu_core_num.to_string()),
            ("browser_language", self.browser_language.to_owned()),
            ("browser_platform", self.browser_platform.to_owned()),
            ("screen_width", self.screen_width.to_string()),
            ("screen_height", self.screen_height.to_string()),
            ("unix", unix_ms.to_string()),
        ]
    }
}

fn generate_device_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(DEVICE_ID_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}
