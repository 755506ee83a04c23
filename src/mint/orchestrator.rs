use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

use crate::chain::{ChainAdapter, ChainError, ChainInstruction, SignedTransaction};
use crate::db::{self, SqlitePool};
use crate::infra::{
    BeginOutcome, DistributedLock, IdempotencyStore, KvError, KvStore, LockError,
};
use crate::mint::dlq::DeadLetterQueue;
use crate::mint::metadata::{MetadataError, MetadataStore};
use crate::mint::recovery::{RecoveryState, RecoveryStore};
use crate::models::{RecoveryPoint, TenantId, TicketStatus, TxType};
use crate::treasury::{TreasuryError, TreasuryGuard};
use crate::vault::{CustodialVault, VaultError};

const LOCK_TTL: Duration = Duration::from_secs(5 * 60);
const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Program id the mint instruction targets.
const TICKET_MINT_PROGRAM: &str = "TickMint1111111111111111111111111111111111";

#[derive(Debug, Error)]
pub enum MintError {
    #[error("Ticket not found")]
    TicketNotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Database error: {0}")]
    Db(#[from] db::CoreDbError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Treasury policy violation: {0}")]
    Treasury(#[from] TreasuryError),

    #[error("State store error: {0}")]
    Kv(#[from] KvError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Successful mint result; also the JSON body cached for idempotent replays.
#[derive(Debug, Clone)]
pub struct MintReceipt {
    pub job_id: String,
    pub status: RecoveryPoint,
    pub mint_address: Option<String>,
    pub signature: Option<String>,
}

impl MintReceipt {
    pub fn to_json(&self) -> Value {
        json!({
            "job_id": self.job_id,
            "status": self.status,
            "mint_address": self.mint_address,
            "signature": self.signature,
        })
    }
}

/// What one mint request resolved to.
#[derive(Debug)]
pub enum MintOutcome {
    /// The mint ran (or resumed) to completion in this call.
    Completed(MintReceipt),
    /// A completed entry already existed for this idempotency key.
    Replayed {
        response: Value,
        original_request_id: String,
        recovery_point: RecoveryPoint,
    },
    /// Another request holds this idempotency key mid-flight.
    InFlight { recovery_point: RecoveryPoint },
}

/// Crash-safe mint pipeline.
///
/// The orchestrator is a reducer over [`RecoveryPoint`]s: load the state,
/// match on the current point, perform that step's one effect, checkpoint,
/// repeat. A process death between any two checkpoints leaves a state the
/// next attempt resumes from; the one subtle case is a submitted-but-not-yet-
/// checkpointed transaction, which is why the intended signature is persisted
/// before submission and looked up on the chain before any resubmission.
pub struct MintOrchestrator {
    db_pool: SqlitePool,
    lock: DistributedLock,
    idempotency: Arc<IdempotencyStore>,
    recovery: RecoveryStore,
    chain: Arc<ChainAdapter>,
    vault: Arc<CustodialVault>,
    metadata: Arc<dyn MetadataStore>,
    guard: Arc<TreasuryGuard>,
    dlq: DeadLetterQueue,
}

impl MintOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: SqlitePool,
        kv: Arc<dyn KvStore>,
        idempotency: Arc<IdempotencyStore>,
        chain: Arc<ChainAdapter>,
        vault: Arc<CustodialVault>,
        metadata: Arc<dyn MetadataStore>,
        guard: Arc<TreasuryGuard>,
        dlq: DeadLetterQueue,
    ) -> Self {
        Self {
            db_pool,
            lock: DistributedLock::new(kv.clone()),
            idempotency,
            recovery: RecoveryStore::new(kv),
            chain,
            vault,
            metadata,
            guard,
            dlq,
        }
    }

    /// Job ids are deterministic per (tenant, ticket) so a re-issued mint
    /// finds the recovery state of the previous attempt.
    pub fn job_id(tenant: &TenantId, ticket_id: &str) -> String {
        format!("mint-{}-{}", tenant, ticket_id)
    }

    fn lock_key(tenant: &TenantId, ticket_id: &str) -> String {
        format!("mint:{}:{}", tenant, ticket_id)
    }

    /// The tenant's minting identity in the custodial vault.
    fn minter_user(tenant: &TenantId) -> String {
        format!("minter:{}", tenant)
    }

    /// Entry point matching the `/mint` contract.
    pub async fn mint(
        &self,
        tenant: &TenantId,
        ticket_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<MintOutcome, MintError> {
        let request_id = Uuid::new_v4().to_string();

        if let Some(key) = idempotency_key {
            match self.idempotency.begin(tenant, key, &request_id)? {
                BeginOutcome::Replayed(entry) => {
                    return Ok(MintOutcome::Replayed {
                        response: entry.response.unwrap_or_else(|| json!({})),
                        original_request_id: entry.request_id,
                        recovery_point: entry.recovery_point,
                    });
                },
                BeginOutcome::InFlight(entry) => {
                    return Ok(MintOutcome::InFlight {
                        recovery_point: entry.recovery_point,
                    });
                },
                BeginOutcome::Started => {},
            }
        }

        let job_id = Self::job_id(tenant, ticket_id);
        match self.run(&job_id, tenant, ticket_id, idempotency_key).await {
            Ok(receipt) => {
                if let Some(key) = idempotency_key {
                    self.idempotency.complete(tenant, key, receipt.to_json())?;
                }
                Ok(MintOutcome::Completed(receipt))
            },
            Err(e) => {
                if let Some(key) = idempotency_key {
                    if let Err(ie) = self.idempotency.fail(tenant, key) {
                        error!(error:% = ie; "Failed to mark idempotency entry failed");
                    }
                }
                let payload = json!({"ticket_id": ticket_id, "idempotency_key": idempotency_key});
                if let Err(de) = self
                    .dlq
                    .enqueue(tenant, &job_id, ticket_id, &e.to_string(), Some(&payload.to_string()))
                    .await
                {
                    error!(error:% = de; "Failed to dead-letter mint job");
                }
                Err(e)
            },
        }
    }

    /// Re-execution path used by the DLQ processor.
    pub async fn retry(&self, tenant: &TenantId, ticket_id: &str, idempotency_key: Option<&str>) -> Result<MintReceipt, MintError> {
        let job_id = Self::job_id(tenant, ticket_id);
        let receipt = self.run(&job_id, tenant, ticket_id, idempotency_key).await?;
        if let Some(key) = idempotency_key {
            self.idempotency.complete(tenant, key, receipt.to_json())?;
        }
        Ok(receipt)
    }

    async fn run(
        &self,
        job_id: &str,
        tenant: &TenantId,
        ticket_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<MintReceipt, MintError> {
        let mut state = match self.recovery.load(job_id)? {
            Some(state) if state.current_point == RecoveryPoint::Completed => {
                // Nothing left to do; hand back what the finished job knows.
                return Ok(Self::receipt(&state));
            },
            Some(mut state) if state.current_point == RecoveryPoint::Failed => {
                // A DLQ retry rewinds to the last completed checkpoint.
                let resume_from = state.previous_point.unwrap_or(RecoveryPoint::Initiated);
                info!(
                    job_id = job_id,
                    resume_from:% = resume_from,
                    retry = state.retry_count + 1;
                    "Resuming failed mint job"
                );
                state.current_point = resume_from;
                state.previous_point = None;
                state.retry_count += 1;
                state.metadata.error = None;
                state
            },
            Some(state) => {
                info!(job_id = job_id, point:% = state.current_point; "Resuming mint job");
                state
            },
            None => RecoveryState::new(job_id, ticket_id, tenant),
        };

        let lock_key = Self::lock_key(tenant, ticket_id);
        let mut lock_token: Option<String> = None;

        let result = self
            .drive(&mut state, tenant, ticket_id, idempotency_key, &lock_key, &mut lock_token)
            .await;

        if let Some(token) = lock_token {
            if let Err(e) = self.lock.release(&lock_key, &token) {
                warn!(job_id = job_id, error:% = e; "Failed to release mint lock");
            }
        }

        match result {
            Ok(()) => Ok(Self::receipt(&state)),
            Err(e) => {
                state.metadata.error = Some(e.to_string());
                state.advance(RecoveryPoint::Failed);
                if let Err(se) = self.recovery.save(&state) {
                    error!(job_id = job_id, error:% = se; "Failed to checkpoint FAILED state");
                }
                self.mark_tx_failed(tenant, ticket_id, &e.to_string()).await;
                Err(e)
            },
        }
    }

    /// The reducer itself: one `match` arm per recovery point, one effect per
    /// arm, checkpoint after each.
    async fn drive(
        &self,
        state: &mut RecoveryState,
        tenant: &TenantId,
        ticket_id: &str,
        idempotency_key: Option<&str>,
        lock_key: &str,
        lock_token: &mut Option<String>,
    ) -> Result<(), MintError> {
        // Resuming past the lock point means re-taking the lock; the old
        // holder's token died with it and the TTL covers the gap.
        if Self::holds_lock_at(state.current_point) && lock_token.is_none() {
            *lock_token = Some(self.lock.acquire(lock_key, LOCK_TTL, LOCK_ACQUIRE_TIMEOUT).await?);
        }

        // The built transaction never outlives the process; what survives a
        // crash is the signature recorded in the recovery metadata.
        let mut built: Option<SignedTransaction> = None;

        loop {
            match state.current_point {
                RecoveryPoint::Initiated => {
                    self.validate(tenant, ticket_id).await?;
                    self.checkpoint(state, RecoveryPoint::Validated, tenant, idempotency_key)?;
                },

                RecoveryPoint::Validated => {
                    if lock_token.is_none() {
                        *lock_token = Some(self.lock.acquire(lock_key, LOCK_TTL, LOCK_ACQUIRE_TIMEOUT).await?);
                    }
                    self.checkpoint(state, RecoveryPoint::Locked, tenant, idempotency_key)?;
                },

                RecoveryPoint::Locked => {
                    let existing = self.reserve(tenant, ticket_id).await?;
                    if let Some(confirmed) = existing {
                        // A previous attempt already got its transaction
                        // confirmed; skip straight to the DB update.
                        state.metadata.signature = confirmed.signature;
                        state.metadata.mint_address = confirmed.mint_address;
                        self.checkpoint(state, RecoveryPoint::TxConfirmed, tenant, idempotency_key)?;
                    } else {
                        self.checkpoint(state, RecoveryPoint::TicketReserved, tenant, idempotency_key)?;
                    }
                },

                RecoveryPoint::TicketReserved => {
                    let uri = self.metadata.upload_ticket_metadata(tenant, ticket_id).await?;
                    state.metadata.metadata_uri = Some(uri);
                    self.checkpoint(state, RecoveryPoint::MetadataUploaded, tenant, idempotency_key)?;
                },

                RecoveryPoint::MetadataUploaded => {
                    if state.metadata.mint_address.is_none() {
                        state.metadata.mint_address = Some(Self::derive_mint_address());
                    }
                    built = Some(self.build_and_sign(state, tenant, ticket_id).await?);
                    // The intended signature is durable before any submit.
                    self.checkpoint(state, RecoveryPoint::TxBuilt, tenant, idempotency_key)?;
                },

                RecoveryPoint::TxBuilt => {
                    // Double-spend guard: if a recorded signature already
                    // reached the chain, the submit from a previous life
                    // landed; never submit twice.
                    if built.is_none() {
                        if let Some(signature) = state.metadata.signature.clone() {
                            if self.chain.signature_status(&signature).await?.is_some() {
                                info!(signature = &*signature; "Recorded signature found on chain, skipping submit");
                                self.record_signature(tenant, ticket_id, &signature).await?;
                                self.checkpoint(state, RecoveryPoint::TxSubmitted, tenant, idempotency_key)?;
                                continue;
                            }
                        }
                        // Unseen on chain: rebuild against a fresh blockhash.
                        built = Some(self.build_and_sign(state, tenant, ticket_id).await?);
                        self.recovery.save(state)?;
                    }

                    let signed = built.take().ok_or_else(|| MintError::Internal("missing built transaction".into()))?;
                    let signature = self.chain.submit(&signed).await?;
                    state.metadata.signature = Some(signature.clone());
                    self.record_signature(tenant, ticket_id, &signature).await?;
                    self.checkpoint(state, RecoveryPoint::TxSubmitted, tenant, idempotency_key)?;
                },

                RecoveryPoint::TxSubmitted => {
                    let signature = state
                        .metadata
                        .signature
                        .clone()
                        .ok_or_else(|| MintError::Internal("TX_SUBMITTED without a signature".into()))?;
                    self.chain
                        .confirm(&signature, self.chain.commitment(), self.chain.confirm_timeout())
                        .await?;
                    self.checkpoint(state, RecoveryPoint::TxConfirmed, tenant, idempotency_key)?;
                },

                RecoveryPoint::TxConfirmed => {
                    self.finalize_db(state, tenant, ticket_id).await?;
                    self.checkpoint(state, RecoveryPoint::DbUpdated, tenant, idempotency_key)?;
                },

                RecoveryPoint::DbUpdated => {
                    self.checkpoint(state, RecoveryPoint::Completed, tenant, idempotency_key)?;
                    info!(
                        target: "audit",
                        job_id = &*state.job_id,
                        ticket_id = ticket_id,
                        mint_address:? = state.metadata.mint_address;
                        "Mint completed"
                    );
                },

                RecoveryPoint::Completed | RecoveryPoint::Failed => break,
            }
        }

        Ok(())
    }

    fn checkpoint(
        &self,
        state: &mut RecoveryState,
        point: RecoveryPoint,
        tenant: &TenantId,
        idempotency_key: Option<&str>,
    ) -> Result<(), MintError> {
        state.advance(point);
        self.recovery.save(state)?;
        if let Some(key) = idempotency_key {
            self.idempotency.checkpoint(tenant, key, point)?;
        }
        Ok(())
    }

    fn holds_lock_at(point: RecoveryPoint) -> bool {
        matches!(
            point,
            RecoveryPoint::Locked
                | RecoveryPoint::TicketReserved
                | RecoveryPoint::MetadataUploaded
                | RecoveryPoint::TxBuilt
                | RecoveryPoint::TxSubmitted
                | RecoveryPoint::TxConfirmed
                | RecoveryPoint::DbUpdated
        )
    }

    fn receipt(state: &RecoveryState) -> MintReceipt {
        MintReceipt {
            job_id: state.job_id.clone(),
            status: state.current_point,
            mint_address: state.metadata.mint_address.clone(),
            signature: state.metadata.signature.clone(),
        }
    }

    fn derive_mint_address() -> String {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        bs58::encode(bytes).into_string()
    }

    async fn validate(&self, tenant: &TenantId, ticket_id: &str) -> Result<(), MintError> {
        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let ticket_id = ticket_id.to_string();

        let ticket = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            db::get_ticket(&conn, &tenant, &ticket_id)
        })
        .await
        .map_err(|e| MintError::Internal(e.to_string()))??
        .ok_or(MintError::TicketNotFound)?;

        if ticket.is_minted {
            return Err(MintError::Validation("ticket already minted".to_string()));
        }
        if !matches!(ticket.status, TicketStatus::Reserved | TicketStatus::Sold) {
            return Err(MintError::Validation(format!(
                "ticket status {} is not mintable",
                ticket.status
            )));
        }
        Ok(())
    }

    /// Reserve step. Returns the existing row when it is already CONFIRMED so
    /// the reducer can skip ahead.
    async fn reserve(
        &self,
        tenant: &TenantId,
        ticket_id: &str,
    ) -> Result<Option<crate::models::MintTransaction>, MintError> {
        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let ticket_id = ticket_id.to_string();

        let tx = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            db::upsert_pending_transaction(&conn, &tenant, &ticket_id, TxType::Mint)
        })
        .await
        .map_err(|e| MintError::Internal(e.to_string()))??;

        if tx.status == crate::models::TxStatus::Confirmed {
            Ok(Some(tx))
        } else {
            Ok(None)
        }
    }

    async fn build_and_sign(
        &self,
        state: &mut RecoveryState,
        tenant: &TenantId,
        ticket_id: &str,
    ) -> Result<SignedTransaction, MintError> {
        let minter = self.vault.get_or_create_wallet(tenant, &Self::minter_user(tenant)).await?;

        let mint_address = state
            .metadata
            .mint_address
            .clone()
            .ok_or_else(|| MintError::Internal("mint address not derived yet".into()))?;
        let metadata_uri = state
            .metadata
            .metadata_uri
            .clone()
            .ok_or_else(|| MintError::Internal("metadata uri missing".into()))?;

        let instruction = ChainInstruction {
            program_id: TICKET_MINT_PROGRAM.to_string(),
            data: serde_json::to_vec(&json!({
                "ticket_id": ticket_id,
                "mint": mint_address,
                "uri": metadata_uri,
            }))
            .map_err(|e| MintError::Internal(e.to_string()))?,
            accounts: vec![minter.address.clone(), mint_address],
        };

        // Outgoing value only ever flows to sanctioned programs.
        self.guard.validate_destination(&instruction.program_id)?;

        let transaction = self
            .chain
            .build(vec![instruction], &minter.address, crate::chain::Urgency::Medium)
            .await?;

        let signing_bytes = ChainAdapter::signing_bytes(&transaction);
        let signature = self
            .vault
            .sign(tenant, &Self::minter_user(tenant), &signing_bytes, &format!("mint {}", ticket_id))
            .await?;

        state.metadata.signature = Some(signature.clone());
        Ok(SignedTransaction { transaction, signature })
    }

    async fn record_signature(&self, tenant: &TenantId, ticket_id: &str, signature: &str) -> Result<(), MintError> {
        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let ticket_id = ticket_id.to_string();
        let signature = signature.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            db::set_transaction_signature(&conn, &tenant, &ticket_id, TxType::Mint, &signature)
        })
        .await
        .map_err(|e| MintError::Internal(e.to_string()))??;
        Ok(())
    }

    /// The post-confirmation DB update: ticket flags and the transaction row
    /// move together in one transaction, still under the mint lock.
    async fn finalize_db(&self, state: &RecoveryState, tenant: &TenantId, ticket_id: &str) -> Result<(), MintError> {
        let signature = state
            .metadata
            .signature
            .clone()
            .ok_or_else(|| MintError::Internal("finalize without signature".into()))?;
        let mint_address = state
            .metadata
            .mint_address
            .clone()
            .ok_or_else(|| MintError::Internal("finalize without mint address".into()))?;

        let slot = self
            .chain
            .signature_status(&signature)
            .await?
            .map(|s| s.slot as i64)
            .unwrap_or(0);

        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let ticket_id = ticket_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<(), db::CoreDbError> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            db::mark_ticket_minted(&tx, &tenant, &ticket_id, &mint_address, &signature)?;
            db::mark_transaction_confirmed(&tx, &tenant, &ticket_id, TxType::Mint, &signature, &mint_address, slot)?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| MintError::Internal(e.to_string()))??;
        Ok(())
    }

    async fn mark_tx_failed(&self, tenant: &TenantId, ticket_id: &str, error: &str) {
        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let ticket_id = ticket_id.to_string();
        let error = error.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            if db::get_chain_transaction(&conn, &tenant, &ticket_id, TxType::Mint)?
                .map(|tx| tx.status != crate::models::TxStatus::Confirmed)
                .unwrap_or(false)
            {
                db::mark_transaction_failed(&conn, &tenant, &ticket_id, TxType::Mint, &error)?;
            }
            Ok::<(), db::CoreDbError>(())
        })
        .await;

        match result {
            Ok(Ok(())) => {},
            Ok(Err(e)) => error!(error:% = e; "Failed to mark chain transaction failed"),
            Err(e) => error!(error:% = e; "Chain transaction failure task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainAdapterConfig, EndpointPool, MockChain};
    use crate::db::test_support::{seed_event, seed_ticket, test_pool};
    use crate::infra::InMemoryKv;
    use crate::mint::metadata::InMemoryMetadataStore;
    use crate::models::{AccessLevel, TxStatus};
    use crate::vault::InMemoryKms;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const IDEM_KEY: &str = "mint-key-0123456789abcdef";

    struct Fixture {
        pool: SqlitePool,
        _dir: tempfile::TempDir,
        chain: Arc<MockChain>,
        metadata: Arc<InMemoryMetadataStore>,
        kv: Arc<InMemoryKv>,
        orchestrator: MintOrchestrator,
        tenant: TenantId,
    }

    fn fixture() -> Fixture {
        let (pool, dir) = test_pool();
        let tenant = TenantId::new("t-1");
        {
            let conn = pool.get().unwrap();
            seed_event(&conn, &tenant, "ev-1", "v-1");
            seed_ticket(&conn, &tenant, "tk-1", "ev-1", "v-1", TicketStatus::Sold, AccessLevel::Ga, SECRET);
        }

        let kv: Arc<InMemoryKv> = Arc::new(InMemoryKv::new());
        let chain = Arc::new(MockChain::new());
        let endpoint_pool = Arc::new(EndpointPool::with_config(
            vec![("rpc-0".to_string(), chain.clone() as Arc<dyn crate::chain::ChainRpc>)],
            3,
            Duration::from_millis(5),
        ));
        let adapter = Arc::new(ChainAdapter::new(endpoint_pool, ChainAdapterConfig {
            confirm_timeout: Duration::from_secs(2),
            ..ChainAdapterConfig::default()
        }));
        let vault = Arc::new(CustodialVault::new(pool.clone(), Arc::new(InMemoryKms::new()), "kms-key-1"));
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let idempotency = Arc::new(IdempotencyStore::new(kv.clone()));
        let dlq = DeadLetterQueue::new(pool.clone());

        let orchestrator = MintOrchestrator::new(
            pool.clone(),
            kv.clone(),
            idempotency,
            adapter,
            vault,
            metadata.clone(),
            Arc::new(crate::treasury::TreasuryGuard::new(Vec::new())),
            dlq,
        );

        Fixture {
            pool,
            _dir: dir,
            chain,
            metadata,
            kv,
            orchestrator,
            tenant,
        }
    }

    #[tokio::test]
    async fn test_happy_path_mints_once() {
        let f = fixture();

        let outcome = f.orchestrator.mint(&f.tenant, "tk-1", Some(IDEM_KEY)).await.unwrap();
        let receipt = match outcome {
            MintOutcome::Completed(r) => r,
            other => panic!("expected completion, got {:?}", other),
        };

        assert_eq!(receipt.status, RecoveryPoint::Completed);
        assert!(receipt.mint_address.is_some());
        assert!(receipt.signature.is_some());

        let conn = f.pool.get().unwrap();
        let ticket = db::get_ticket(&conn, &f.tenant, "tk-1").unwrap().unwrap();
        assert!(ticket.is_minted);
        assert_eq!(ticket.status, TicketStatus::Minted);
        assert_eq!(ticket.mint_address, receipt.mint_address);
        assert_eq!(ticket.mint_tx_id, receipt.signature);

        assert_eq!(db::count_confirmed_mints(&conn, &f.tenant, "tk-1").unwrap(), 1);
        assert_eq!(f.chain.submitted_count(), 1);
        assert_eq!(f.metadata.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_replay_returns_cached_body() {
        let f = fixture();

        let first = match f.orchestrator.mint(&f.tenant, "tk-1", Some(IDEM_KEY)).await.unwrap() {
            MintOutcome::Completed(r) => r.to_json(),
            other => panic!("expected completion, got {:?}", other),
        };

        let outcome = f.orchestrator.mint(&f.tenant, "tk-1", Some(IDEM_KEY)).await.unwrap();
        match outcome {
            MintOutcome::Replayed {
                response,
                recovery_point,
                ..
            } => {
                assert_eq!(response, first);
                assert_eq!(recovery_point, RecoveryPoint::Completed);
            },
            other => panic!("expected replay, got {:?}", other),
        }

        // Replay did not touch the chain again.
        assert_eq!(f.chain.submitted_count(), 1);
    }

    #[tokio::test]
    async fn test_resume_after_submit_does_not_double_spend() {
        let f = fixture();

        // A previous process got as far as signing and submitting, then died
        // before TX_SUBMITTED became visible: recovery says TX_BUILT with the
        // signature recorded, and the chain has already seen it.
        let job_id = MintOrchestrator::job_id(&f.tenant, "tk-1");
        let recovery = RecoveryStore::new(f.kv.clone());
        let mut state = RecoveryState::new(&job_id, "tk-1", &f.tenant);
        state.metadata.metadata_uri = Some("meta://tk-1/prior".to_string());
        state.metadata.mint_address = Some("MintPrior111".to_string());
        state.metadata.signature = Some("sig-prior-1".to_string());
        state.advance(RecoveryPoint::Validated);
        state.advance(RecoveryPoint::Locked);
        state.advance(RecoveryPoint::TicketReserved);
        state.advance(RecoveryPoint::MetadataUploaded);
        state.advance(RecoveryPoint::TxBuilt);
        recovery.save(&state).unwrap();

        {
            let conn = f.pool.get().unwrap();
            db::upsert_pending_transaction(&conn, &f.tenant, "tk-1", TxType::Mint).unwrap();
        }
        f.chain.seed_confirmed_signature("sig-prior-1", 77);

        let outcome = f.orchestrator.mint(&f.tenant, "tk-1", Some(IDEM_KEY)).await.unwrap();
        let receipt = match outcome {
            MintOutcome::Completed(r) => r,
            other => panic!("expected completion, got {:?}", other),
        };

        // The prior signature was adopted; nothing was submitted again.
        assert_eq!(receipt.signature.as_deref(), Some("sig-prior-1"));
        assert_eq!(receipt.mint_address.as_deref(), Some("MintPrior111"));
        assert_eq!(f.chain.submitted_count(), 0);

        let conn = f.pool.get().unwrap();
        assert_eq!(db::count_confirmed_mints(&conn, &f.tenant, "tk-1").unwrap(), 1);
        let tx = db::get_chain_transaction(&conn, &f.tenant, "tk-1", TxType::Mint).unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.slot_number, 77);
    }

    #[tokio::test]
    async fn test_lock_contention_dead_letters_as_retryable() {
        let f = fixture();

        // Another holder owns the per-ticket mint lock.
        let lock = DistributedLock::new(f.kv.clone());
        let _held = lock
            .try_acquire(&MintOrchestrator::lock_key(&f.tenant, "tk-1"), Duration::from_secs(300))
            .unwrap();

        let err = f.orchestrator.mint(&f.tenant, "tk-1", Some(IDEM_KEY)).await.unwrap_err();
        assert!(matches!(err, MintError::Lock(LockError::AcquireTimeout(_, _))));

        let conn = f.pool.get().unwrap();
        let item = db::get_dlq_item(&conn, 1).unwrap().expect("job should be dead-lettered");
        assert_eq!(item.category, crate::models::DlqCategory::Retryable);
        assert!(item.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn test_validation_failures() {
        let f = fixture();
        {
            let conn = f.pool.get().unwrap();
            seed_ticket(&conn, &f.tenant, "tk-refunded", "ev-1", "v-1", TicketStatus::Refunded, AccessLevel::Ga, SECRET);
        }

        let err = f.orchestrator.mint(&f.tenant, "tk-ghost", None).await.unwrap_err();
        assert!(matches!(err, MintError::TicketNotFound));

        let err = f.orchestrator.mint(&f.tenant, "tk-refunded", None).await.unwrap_err();
        assert!(matches!(err, MintError::Validation(_)));

        // A foreign tenant sees not-found, not a validation detail.
        let err = f.orchestrator.mint(&TenantId::new("t-2"), "tk-1", None).await.unwrap_err();
        assert!(matches!(err, MintError::TicketNotFound));
    }

    #[tokio::test]
    async fn test_transient_submit_failure_then_dlq_retry_completes_once() {
        let f = fixture();
        // The single endpoint rejects the first submit, leaving the job
        // FAILED with a retryable transport error.
        f.chain.fail_next_submits(1);

        let err = f.orchestrator.mint(&f.tenant, "tk-1", Some(IDEM_KEY)).await.unwrap_err();
        assert!(matches!(err, MintError::Chain(_)));

        let recovery = RecoveryStore::new(f.kv.clone());
        let job_id = MintOrchestrator::job_id(&f.tenant, "tk-1");
        let state = recovery.load(&job_id).unwrap().unwrap();
        assert_eq!(state.current_point, RecoveryPoint::Failed);

        // The DLQ retry path resumes and completes exactly once.
        let receipt = f.orchestrator.retry(&f.tenant, "tk-1", Some(IDEM_KEY)).await.unwrap();
        assert_eq!(receipt.status, RecoveryPoint::Completed);

        let conn = f.pool.get().unwrap();
        assert_eq!(db::count_confirmed_mints(&conn, &f.tenant, "tk-1").unwrap(), 1);
        assert_eq!(f.chain.submitted_count(), 1);
    }
}
