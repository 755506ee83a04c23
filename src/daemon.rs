//! Long-running service mode: API server plus background workers.
//!
//! The daemon assembles the [`Core`] context, starts the DLQ processor, the
//! RPC endpoint prober, the treasury monitor, and (when a broker is wired)
//! the sync consumer, serves the HTTP API, and coordinates graceful shutdown
//! across all of them through one broadcast channel.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{error, info};
use serde_json::Value;
use tokio::{signal, sync::broadcast};
use url::Url;

use crate::api;
use crate::chain::{ChainRpc, HttpChainClient};
use crate::config::{Secrets, Settings};
use crate::core::Core;
use crate::db;
use crate::http::InternalServiceClient;
use crate::infra::InMemoryKv;
use crate::mint::{DlqProcessor, MintOrchestrator, RetryHandler};
use crate::models::DlqItem;
use crate::sync::{MessageBus, SyncConsumer};
use crate::vault::InMemoryKms;

/// Re-drives dead-lettered mint jobs through the orchestrator.
struct MintRetryHandler {
    orchestrator: Arc<MintOrchestrator>,
}

#[async_trait]
impl RetryHandler for MintRetryHandler {
    async fn retry(&self, item: &DlqItem) -> Result<(), String> {
        let idempotency_key = item
            .payload
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|v| v.get("idempotency_key").and_then(|k| k.as_str()).map(str::to_string));

        self.orchestrator
            .retry(&item.tenant_id, &item.ticket_id, idempotency_key.as_deref())
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Daemon for running the core in continuous service mode.
pub struct Daemon {
    settings: Settings,
    secrets: Secrets,
    bus: Option<Arc<dyn MessageBus>>,
}

impl Daemon {
    pub fn new(settings: Settings, secrets: Secrets) -> Self {
        Self {
            settings,
            secrets,
            bus: None,
        }
    }

    /// Attaches a message-bus subscription for `event.blockchain_sync_requested`.
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Runs the daemon until a shutdown signal is received.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        info!("Daemon started. Press Ctrl+C to stop.");

        let (shutdown_tx, _) = broadcast::channel(1);

        let db_pool = db::init_db(&self.settings.database_file)?;

        // Process-local KV; the production deployment swaps in the
        // Redis-backed implementation of the same trait at this seam.
        let kv = Arc::new(InMemoryKv::new());

        let mut endpoints: Vec<(String, Arc<dyn ChainRpc>)> = Vec::new();
        for raw in &self.settings.rpc_endpoints {
            let url: Url = raw.parse().map_err(|e| anyhow!("Invalid RPC endpoint '{}': {}", raw, e))?;
            endpoints.push((raw.clone(), Arc::new(HttpChainClient::new(url)?)));
        }

        let core = Core::build(
            &self.settings,
            &self.secrets,
            db_pool.clone(),
            kv,
            endpoints,
            Arc::new(InMemoryKms::new()),
            Arc::new(crate::mint::InMemoryMetadataStore::new()),
        )?;

        let dlq_handler = Arc::new(MintRetryHandler {
            orchestrator: core.orchestrator.clone(),
        });
        let dlq_handle = DlqProcessor::new(db_pool.clone(), dlq_handler).run(shutdown_tx.subscribe());

        let prober_handle = core.endpoint_pool.clone().run_prober(shutdown_tx.subscribe());
        let treasury_handle = core.treasury_monitor.clone().run(shutdown_tx.subscribe());

        let consumer_handle = match &self.bus {
            Some(bus) => {
                let callback = Arc::new(InternalServiceClient::new(
                    self.settings.callback_base_url.parse()?,
                    self.settings.service_name.clone(),
                    core.internal_auth.clone(),
                )?);
                let consumer = Arc::new(SyncConsumer::new(bus.clone(), core.orchestrator.clone(), callback));
                Some(consumer.run(shutdown_tx.subscribe()))
            },
            None => {
                info!("No message bus configured; sync consumer disabled.");
                None
            },
        };

        let router = api::create_router(core);
        let addr = format!("0.0.0.0:{}", self.settings.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow!("Failed to bind API server to {}: {}", addr, e))?;

        info!(address = &*addr; "API server listening");

        let mut shutdown_rx_api = shutdown_tx.subscribe();
        let api_server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx_api.recv().await.ok();
                })
                .await
        });

        signal::ctrl_c().await?;
        info!("Received shutdown signal, stopping all tasks...");
        if shutdown_tx.send(()).is_err() {
            error!("Failed to send shutdown signal. All tasks may not have received it.");
        }

        api_server_handle
            .await
            .map_err(|e| anyhow!("API server task panicked: {}", e))??;
        dlq_handle.await.map_err(|e| anyhow!("DLQ processor panicked: {}", e))?;
        prober_handle.await.map_err(|e| anyhow!("Endpoint prober panicked: {}", e))?;
        treasury_handle
            .await
            .map_err(|e| anyhow!("Treasury monitor panicked: {}", e))?;
        if let Some(handle) = consumer_handle {
            handle.await.map_err(|e| anyhow!("Sync consumer panicked: {}", e))?;
        }

        info!("Daemon stopped gracefully.");
        Ok(())
    }
}
