use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::chain::failover::EndpointPool;
use crate::chain::fees;
use crate::chain::types::{
    BuiltTransaction, ChainError, ChainInstruction, Commitment, FeeEstimate, SignatureStatus,
    SignedTransaction, Urgency,
};

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Well-known compute-budget program id carried on the preamble
/// instructions.
const COMPUTE_BUDGET_PROGRAM: &str = "ComputeBudget111111111111111111111111111111";

#[derive(Debug, Clone)]
pub struct ChainAdapterConfig {
    pub commitment: Commitment,
    pub confirm_timeout: Duration,
    pub default_compute_units: u64,
}

impl Default for ChainAdapterConfig {
    fn default() -> Self {
        Self {
            commitment: Commitment::Confirmed,
            confirm_timeout: Duration::from_secs(60),
            default_compute_units: fees::DEFAULT_COMPUTE_UNITS,
        }
    }
}

/// The orchestrator's one stop for chain work: estimation, building,
/// submission, confirmation, and balance reads, all routed through the
/// failover pool.
pub struct ChainAdapter {
    pool: Arc<EndpointPool>,
    config: ChainAdapterConfig,
}

impl ChainAdapter {
    pub fn new(pool: Arc<EndpointPool>, config: ChainAdapterConfig) -> Self {
        Self { pool, config }
    }

    pub fn commitment(&self) -> Commitment {
        self.config.commitment
    }

    pub fn confirm_timeout(&self) -> Duration {
        self.config.confirm_timeout
    }

    /// Simulates the draft and combines the compute budget with the current
    /// priority-fee market.
    pub async fn estimate(&self, draft: &BuiltTransaction, urgency: Urgency) -> Result<FeeEstimate, ChainError> {
        let simulation = self
            .pool
            .execute(|rpc| {
                let draft = draft.clone();
                async move { rpc.simulate_transaction(&draft).await }
            })
            .await?;

        let (compute_unit_limit, simulated) =
            fees::estimate_compute_units(&simulation, self.config.default_compute_units);
        if !simulated {
            warn!(
                error:? = simulation.err;
                "Simulation unavailable, using default compute budget"
            );
        }

        let recent = self
            .pool
            .execute(|rpc| async move { rpc.get_recent_prioritization_fees().await })
            .await
            .unwrap_or_default();
        let priority_fee_micro = fees::estimate_priority_fee(&recent, urgency);

        Ok(FeeEstimate {
            compute_unit_limit,
            priority_fee_micro,
            simulated,
        })
    }

    /// Assembles the final transaction: compute-budget preamble first, then
    /// the caller's instructions, against a fresh blockhash.
    pub async fn build(
        &self,
        instructions: Vec<ChainInstruction>,
        fee_payer: &str,
        urgency: Urgency,
    ) -> Result<BuiltTransaction, ChainError> {
        let blockhash = self
            .pool
            .execute(|rpc| async move { rpc.get_latest_blockhash().await })
            .await?;

        let draft = BuiltTransaction {
            instructions: instructions.clone(),
            fee_payer: fee_payer.to_string(),
            recent_blockhash: blockhash.clone(),
            compute_unit_limit: self.config.default_compute_units,
            compute_unit_price_micro: 0,
        };
        let estimate = self.estimate(&draft, urgency).await?;

        let mut all_instructions = vec![
            ChainInstruction {
                program_id: COMPUTE_BUDGET_PROGRAM.to_string(),
                data: encode_u64_instruction(0x02, estimate.compute_unit_limit),
                accounts: Vec::new(),
            },
            ChainInstruction {
                program_id: COMPUTE_BUDGET_PROGRAM.to_string(),
                data: encode_u64_instruction(0x03, estimate.priority_fee_micro),
                accounts: Vec::new(),
            },
        ];
        all_instructions.extend(instructions);

        debug!(
            compute_units = estimate.compute_unit_limit,
            priority_fee = estimate.priority_fee_micro,
            simulated = estimate.simulated;
            "Transaction built"
        );

        Ok(BuiltTransaction {
            instructions: all_instructions,
            fee_payer: fee_payer.to_string(),
            recent_blockhash: blockhash,
            compute_unit_limit: estimate.compute_unit_limit,
            compute_unit_price_micro: estimate.priority_fee_micro,
        })
    }

    /// Serialized message bytes the vault signs over.
    pub fn signing_bytes(tx: &BuiltTransaction) -> Vec<u8> {
        // Deterministic serialization; the chain SDK owns the real wire
        // format, this only needs to bind the signature to the content.
        serde_json::to_vec(tx).unwrap_or_default()
    }

    pub async fn submit(&self, signed: &SignedTransaction) -> Result<String, ChainError> {
        let signature = self
            .pool
            .execute(|rpc| {
                let tx = signed.transaction.clone();
                let sig = signed.signature.clone();
                async move { rpc.send_transaction(&tx, &sig).await }
            })
            .await?;

        info!(signature = &*signature; "Transaction submitted");
        Ok(signature)
    }

    /// Polls until the signature reaches `commitment` or the timeout lapses.
    pub async fn confirm(
        &self,
        signature: &str,
        commitment: Commitment,
        timeout: Duration,
    ) -> Result<SignatureStatus, ChainError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let status = self.signature_status(signature).await?;

            if let Some(status) = status {
                if let Some(err) = &status.err {
                    return Err(ChainError::Rejected(err.clone()));
                }
                if status.satisfies(commitment) {
                    info!(signature = signature, slot = status.slot; "Transaction confirmed");
                    return Ok(status);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ChainError::ConfirmationTimeout(signature.to_string()));
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
    }

    /// Single status read, used both by confirmation polling and by the
    /// orchestrator's pre-resubmission lookup.
    pub async fn signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>, ChainError> {
        self.pool
            .execute(|rpc| {
                let signature = signature.to_string();
                async move { rpc.get_signature_status(&signature).await }
            })
            .await
    }

    pub async fn get_balance(&self, address: &str) -> Result<u64, ChainError> {
        self.pool
            .execute(|rpc| {
                let address = address.to_string();
                async move { rpc.get_balance(&address).await }
            })
            .await
    }
}

/// Compact little-endian encoding for compute-budget preamble data.
fn encode_u64_instruction(tag: u8, value: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(9);
    data.push(tag);
    data.extend_from_slice(&value.to_le_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::rpc::{ChainRpc, MockChain};

    fn adapter_with(chain: Arc<MockChain>) -> ChainAdapter {
        let pool = Arc::new(EndpointPool::with_config(
            vec![("rpc-0".to_string(), chain as Arc<dyn ChainRpc>)],
            3,
            Duration::from_millis(5),
        ));
        ChainAdapter::new(pool, ChainAdapterConfig::default())
    }

    fn mint_instruction() -> ChainInstruction {
        ChainInstruction {
            program_id: "TicketMint1111111111111111111111111111111111".to_string(),
            data: vec![1, 2, 3],
            accounts: vec!["Payer111".to_string()],
        }
    }

    #[tokio::test]
    async fn test_build_prepends_compute_budget() {
        let chain = Arc::new(MockChain::new());
        chain.set_simulation_units(100_000);
        chain.set_recent_fees(vec![400, 600, 800]);

        let adapter = adapter_with(chain);
        let tx = adapter.build(vec![mint_instruction()], "Payer111", Urgency::Medium).await.unwrap();

        assert_eq!(tx.instructions.len(), 3);
        assert_eq!(tx.instructions[0].program_id, COMPUTE_BUDGET_PROGRAM);
        assert_eq!(tx.instructions[1].program_id, COMPUTE_BUDGET_PROGRAM);
        assert_eq!(tx.compute_unit_limit, 120_000);
        assert_eq!(tx.compute_unit_price_micro, 600);
        assert!(!tx.recent_blockhash.is_empty());
    }

    #[tokio::test]
    async fn test_estimate_flags_failed_simulation() {
        let chain = Arc::new(MockChain::new());
        chain.set_simulation_error("program failed");

        let adapter = adapter_with(chain);
        let draft = BuiltTransaction {
            instructions: vec![mint_instruction()],
            fee_payer: "Payer111".to_string(),
            recent_blockhash: "hash".to_string(),
            compute_unit_limit: 0,
            compute_unit_price_micro: 0,
        };
        let estimate = adapter.estimate(&draft, Urgency::Medium).await.unwrap();

        assert!(!estimate.simulated);
        assert_eq!(estimate.compute_unit_limit, fees::DEFAULT_COMPUTE_UNITS);
    }

    #[tokio::test]
    async fn test_submit_and_confirm() {
        let chain = Arc::new(MockChain::new());
        let adapter = adapter_with(chain.clone());

        let tx = adapter.build(vec![mint_instruction()], "Payer111", Urgency::Low).await.unwrap();
        let signed = SignedTransaction {
            transaction: tx,
            signature: "sig-test-1".to_string(),
        };

        let signature = adapter.submit(&signed).await.unwrap();
        let status = adapter
            .confirm(&signature, Commitment::Confirmed, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(status.satisfies(Commitment::Confirmed));
        assert_eq!(chain.submitted_count(), 1);
    }

    #[tokio::test]
    async fn test_confirm_times_out_for_unseen_signature() {
        let chain = Arc::new(MockChain::new());
        let adapter = adapter_with(chain);

        let err = adapter
            .confirm("sig-never-sent", Commitment::Confirmed, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::ConfirmationTimeout(_)));
    }
}
