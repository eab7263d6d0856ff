// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::credential::pool::{CredentialPool, PoolSettings};
use crate::credential::renewal::Renewer;
use crate::proxy::{ForwardSettings, Forwarder};
use crate::scheduler::{spawn_latency_persister, spawn_refresh_timer};
use crate::selector::EndpointSelector;
use crate::store::Store;

/// Shared proxy state.
pub struct AppState {
    pub config: ProxyConfig,
    pub store: Arc<dyn Store>,
    pub selector: Arc<EndpointSelector>,
    pub pool: Arc<CredentialPool>,
    pub forwarder: Forwarder,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the selector, pool and forwarder over `store` and `renewer`.
    pub fn new(
        config: ProxyConfig,
        store: Arc<dyn Store>,
        renewer: Arc<dyn Renewer>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let selector = Arc::new(EndpointSelector::new(config.endpoints.clone())?);
        let pool = Arc::new(CredentialPool::new(
            Arc::clone(&store),
            renewer,
            PoolSettings {
                credential_ttl: config.credential_cache_ttl(),
                status_ttl: config.status_cache_ttl(),
            },
        ));
        let forwarder = Forwarder::new(
            Arc::clone(&selector),
            Arc::clone(&pool),
            ForwardSettings {
                model: config.model.clone(),
                default_voice: config.default_voice.clone(),
                user_agent: config.user_agent.clone(),
                connect_timeout: config.connect_timeout(),
                first_byte_timeout: config.first_byte_timeout(),
                read_timeout: config.read_timeout(),
            },
        )?;
        Ok(Self { config, store, selector, pool, forwarder, shutdown })
    }

    /// Start the configured timers. They stop once `shutdown` is cancelled.
    pub fn spawn_timers(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if let Some(period) = self.config.refresh_interval() {
            tasks.push(spawn_refresh_timer(Arc::clone(&self.pool), period, self.shutdown.clone()));
        }
        if let Some(period) = self.config.latency_persist_interval() {
            tasks.push(spawn_latency_persister(
                Arc::clone(&self.selector),
                Arc::clone(&self.store),
                period,
                self.shutdown.clone(),
            ));
        }
        tasks
    }
}
