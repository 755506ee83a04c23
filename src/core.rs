//! The explicit application context.
//!
//! Every handler and worker receives what it needs through this struct; there
//! are no ambient singletons, so tests assemble a fresh [`Core`] from fakes
//! and production wiring assembles one from the real adapters.

use std::sync::Arc;
use std::time::Duration;

use crate::anomaly::AnomalyDetector;
use crate::chain::{ChainAdapter, ChainAdapterConfig, ChainRpc, Commitment, EndpointPool};
use crate::config::{Secrets, Settings};
use crate::db::SqlitePool;
use crate::infra::{Bulkhead, BulkheadConfig, IdempotencyStore, InternalAuth, KvStore};
use crate::mint::{DeadLetterQueue, MetadataStore, MintOrchestrator};
use crate::scan::{ManifestBuilder, ScanDecider};
use crate::treasury::{TreasuryGuard, TreasuryMonitor, TreasuryThresholds};
use crate::vault::{CustodialVault, KmsClient};

pub struct Core {
    pub db_pool: SqlitePool,
    pub kv: Arc<dyn KvStore>,
    pub decider: Arc<ScanDecider>,
    pub manifest_builder: Arc<ManifestBuilder>,
    pub anomaly: Arc<AnomalyDetector>,
    pub orchestrator: Arc<MintOrchestrator>,
    pub idempotency: Arc<IdempotencyStore>,
    pub bulkhead: Arc<Bulkhead>,
    pub internal_auth: Arc<InternalAuth>,
    pub treasury_guard: Arc<TreasuryGuard>,
    pub treasury_monitor: Arc<TreasuryMonitor>,
    pub endpoint_pool: Arc<EndpointPool>,
    pub chain: Arc<ChainAdapter>,
    pub vault: Arc<CustodialVault>,
    pub dlq: DeadLetterQueue,
}

impl Core {
    /// Assembles the context from configuration plus the injectable adapters
    /// (chain endpoints, KMS, metadata storage).
    pub fn build(
        settings: &Settings,
        secrets: &Secrets,
        db_pool: SqlitePool,
        kv: Arc<dyn KvStore>,
        endpoints: Vec<(String, Arc<dyn ChainRpc>)>,
        kms: Arc<dyn KmsClient>,
        metadata: Arc<dyn MetadataStore>,
    ) -> anyhow::Result<Arc<Self>> {
        let endpoint_pool = Arc::new(EndpointPool::new(endpoints));

        let commitment: Commitment = settings
            .commitment
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let chain = Arc::new(ChainAdapter::new(
            endpoint_pool.clone(),
            ChainAdapterConfig {
                commitment,
                confirm_timeout: Duration::from_secs(settings.confirm_timeout_secs),
                ..ChainAdapterConfig::default()
            },
        ));

        let vault = Arc::new(CustodialVault::new(db_pool.clone(), kms, secrets.kms_key_id.clone()));
        let idempotency = Arc::new(IdempotencyStore::new(kv.clone()));
        let dlq = DeadLetterQueue::new(db_pool.clone());

        let treasury_guard = Arc::new(TreasuryGuard::from_env_or_file(
            std::env::var("TREASURY_WHITELIST").ok().as_deref(),
            settings.treasury_whitelist_file.as_deref(),
        )?);

        let orchestrator = Arc::new(MintOrchestrator::new(
            db_pool.clone(),
            kv.clone(),
            idempotency.clone(),
            chain.clone(),
            vault.clone(),
            metadata,
            treasury_guard.clone(),
            dlq.clone(),
        ));

        let decider = Arc::new(ScanDecider::new(
            db_pool.clone(),
            kv.clone(),
            Duration::from_secs(settings.rotation_window_secs),
        ));
        let manifest_builder = Arc::new(ManifestBuilder::new(db_pool.clone(), secrets.hmac_secret.as_bytes()));
        let anomaly = Arc::new(AnomalyDetector::new(db_pool.clone()));

        let bulkhead = Arc::new(Bulkhead::new(BulkheadConfig {
            mint: settings.bulkhead.mint,
            wallet: settings.bulkhead.wallet,
            query: settings.bulkhead.query,
            admin: settings.bulkhead.admin,
        }));

        let internal_auth = Arc::new(InternalAuth::new(
            &secrets.internal_service_secret,
            settings.allowed_internal_services.iter().cloned(),
        ));

        let treasury_monitor = Arc::new(TreasuryMonitor::new(
            chain.clone(),
            db_pool.clone(),
            settings.treasury_address.clone(),
            TreasuryThresholds::default(),
            settings.treasury_webhook_url.clone(),
        ));

        Ok(Arc::new(Self {
            db_pool,
            kv,
            decider,
            manifest_builder,
            anomaly,
            orchestrator,
            idempotency,
            bulkhead,
            internal_auth,
            treasury_guard,
            treasury_monitor,
            endpoint_pool,
            chain,
            vault,
            dlq,
        }))
    }
}
