use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::chain::types::{
    BuiltTransaction, ChainError, Commitment, SignatureStatus, SimulationResult,
};

/// The opaque RPC surface of the chain: simulation, submission, confirmation
/// primitives, and the cheap reads the failover prober and treasury monitor
/// need. Production wiring speaks JSON-RPC; tests use [`MockChain`].
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_latest_blockhash(&self) -> Result<String, ChainError>;

    async fn get_slot(&self) -> Result<u64, ChainError>;

    async fn simulate_transaction(&self, tx: &BuiltTransaction) -> Result<SimulationResult, ChainError>;

    /// Recent prioritization fees in micro-units, most recent last.
    async fn get_recent_prioritization_fees(&self) -> Result<Vec<u64>, ChainError>;

    /// Submits and returns the transaction signature.
    async fn send_transaction(&self, tx: &BuiltTransaction, signature: &str) -> Result<String, ChainError>;

    /// None when the chain has never seen the signature.
    async fn get_signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>, ChainError>;

    /// Balance in lamports.
    async fn get_balance(&self, address: &str) -> Result<u64, ChainError>;
}

/// In-memory chain fake with scriptable failure behavior.
///
/// Tests drive it through the same trait the orchestrator uses, flipping
/// [`fail_next`](Self::fail_next) or pre-seeding signature statuses to
/// exercise retry and recovery paths.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockChainState>,
}

#[derive(Default)]
struct MockChainState {
    slot: u64,
    statuses: HashMap<String, SignatureStatus>,
    balances: HashMap<String, u64>,
    recent_fees: Vec<u64>,
    simulation_units: Option<u64>,
    simulation_error: Option<String>,
    fail_submits: u32,
    fail_all: bool,
    submitted: Vec<String>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, address: &str, lamports: u64) {
        self.state.lock().unwrap().balances.insert(address.to_string(), lamports);
    }

    pub fn set_recent_fees(&self, fees: Vec<u64>) {
        self.state.lock().unwrap().recent_fees = fees;
    }

    pub fn set_simulation_units(&self, units: u64) {
        self.state.lock().unwrap().simulation_units = Some(units);
    }

    pub fn set_simulation_error(&self, err: &str) {
        self.state.lock().unwrap().simulation_error = Some(err.to_string());
    }

    /// The next `n` submissions fail with a transport error.
    pub fn fail_next_submits(&self, n: u32) {
        self.state.lock().unwrap().fail_submits = n;
    }

    /// Every call fails until cleared; used to exercise endpoint failover.
    pub fn fail_all(&self, fail: bool) {
        self.state.lock().unwrap().fail_all = fail;
    }

    /// Marks a signature as already confirmed, as if a previous process
    /// submitted it before crashing.
    pub fn seed_confirmed_signature(&self, signature: &str, slot: u64) {
        self.state.lock().unwrap().statuses.insert(
            signature.to_string(),
            SignatureStatus {
                slot,
                commitment: Some(Commitment::Finalized),
                err: None,
            },
        );
    }

    pub fn submitted_count(&self) -> usize {
        self.state.lock().unwrap().submitted.len()
    }

    fn check_fail_all(state: &MockChainState) -> Result<(), ChainError> {
        if state.fail_all {
            Err(ChainError::Transport("mock endpoint down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn get_latest_blockhash(&self) -> Result<String, ChainError> {
        let state = self.state.lock().unwrap();
        Self::check_fail_all(&state)?;
        Ok(format!("blockhash-{}", Uuid::new_v4()))
    }

    async fn get_slot(&self) -> Result<u64, ChainError> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail_all(&state)?;
        state.slot += 1;
        Ok(state.slot)
    }

    async fn simulate_transaction(&self, _tx: &BuiltTransaction) -> Result<SimulationResult, ChainError> {
        let state = self.state.lock().unwrap();
        Self::check_fail_all(&state)?;
        if let Some(err) = &state.simulation_error {
            return Ok(SimulationResult {
                units_consumed: None,
                err: Some(err.clone()),
            });
        }
        Ok(SimulationResult {
            units_consumed: Some(state.simulation_units.unwrap_or(120_000)),
            err: None,
        })
    }

    async fn get_recent_prioritization_fees(&self) -> Result<Vec<u64>, ChainError> {
        let state = self.state.lock().unwrap();
        Self::check_fail_all(&state)?;
        Ok(state.recent_fees.clone())
    }

    async fn send_transaction(&self, _tx: &BuiltTransaction, signature: &str) -> Result<String, ChainError> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail_all(&state)?;
        if state.fail_submits > 0 {
            state.fail_submits -= 1;
            return Err(ChainError::Transport("connection reset by peer".to_string()));
        }
        state.slot += 1;
        let slot = state.slot;
        state.submitted.push(signature.to_string());
        state.statuses.insert(
            signature.to_string(),
            SignatureStatus {
                slot,
                commitment: Some(Commitment::Confirmed),
                err: None,
            },
        );
        Ok(signature.to_string())
    }

    async fn get_signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>, ChainError> {
        let state = self.state.lock().unwrap();
        Self::check_fail_all(&state)?;
        Ok(state.statuses.get(signature).cloned())
    }

    async fn get_balance(&self, address: &str) -> Result<u64, ChainError> {
        let state = self.state.lock().unwrap();
        Self::check_fail_all(&state)?;
        Ok(state.balances.get(address).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_tx() -> BuiltTransaction {
        BuiltTransaction {
            instructions: Vec::new(),
            fee_payer: "Payer111".to_string(),
            recent_blockhash: "hash".to_string(),
            compute_unit_limit: 200_000,
            compute_unit_price_micro: 100,
        }
    }

    #[tokio::test]
    async fn test_mock_submit_then_status() {
        let chain = MockChain::new();
        let sig = chain.send_transaction(&dummy_tx(), "sig-1").await.unwrap();
        assert_eq!(sig, "sig-1");

        let status = chain.get_signature_status("sig-1").await.unwrap().unwrap();
        assert!(status.satisfies(Commitment::Confirmed));
        assert!(chain.get_signature_status("sig-unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_scripted_failures() {
        let chain = MockChain::new();
        chain.fail_next_submits(1);

        assert!(chain.send_transaction(&dummy_tx(), "sig-1").await.is_err());
        assert!(chain.send_transaction(&dummy_tx(), "sig-1").await.is_ok());
        assert_eq!(chain.submitted_count(), 1);
    }
}
