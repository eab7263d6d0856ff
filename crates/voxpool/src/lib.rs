// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Voxpool: credential-pooling reverse proxy for a speech synthesis API.

pub mod config;
pub mod credential;
pub mod error;
pub mod proxy;
pub mod scheduler;
pub mod selector;
pub mod state;
pub mod store;
pub mod transport;

use std::sync::{Arc, Once};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::credential::renewal::HttpRenewer;
use crate::state::AppState;
use crate::transport::build_router;

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Run the proxy server until Ctrl-C.
pub async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let store = store::from_config(&config)?;
    let renewer = Arc::new(HttpRenewer::new(&config.renewal_url, config.renewal_timeout())?);
    let state = Arc::new(AppState::new(config, store, renewer, CancellationToken::new())?);
    let shutdown = state.shutdown.clone();

    // Saved latencies seed the selector before the first request.
    if let Err(e) = state.selector.load(state.store.as_ref()).await {
        tracing::warn!(err = %e, "failed to load endpoint latency table, starting from defaults");
    }

    if let Some(period) = state.config.refresh_interval() {
        tracing::info!(interval_ms = period.as_millis() as u64, "scheduled bulk refresh enabled");
    }
    let tasks = state.spawn_timers();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            shutdown.cancel();
        });
    }

    tracing::info!(
        endpoints = state.selector.len(),
        store = ?state.config.store,
        "voxpool listening on {addr}"
    );
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(err = %e, "background task ended abnormally");
        }
    }
    Ok(())
}
