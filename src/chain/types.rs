use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC call timed out after {0} ms")]
    Timeout(u64),

    #[error("Transaction rejected by the chain: {0}")]
    Rejected(String),

    #[error("Confirmation timed out for signature {0}")]
    ConfirmationTimeout(String),

    #[error("All RPC endpoints failed; last error: {0}")]
    AllEndpointsFailed(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Malformed RPC response: {0}")]
    BadResponse(String),
}

/// Chain-specified durability: processed < confirmed < finalized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Commitment::Processed => write!(f, "processed"),
            Commitment::Confirmed => write!(f, "confirmed"),
            Commitment::Finalized => write!(f, "finalized"),
        }
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            _ => Err(format!("Invalid Commitment: {}", s)),
        }
    }
}

/// One opaque instruction destined for the chain; the adapter does not
/// interpret instruction contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInstruction {
    pub program_id: String,
    pub data: Vec<u8>,
    pub accounts: Vec<String>,
}

/// A transaction assembled by the adapter, compute-budget preamble included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltTransaction {
    pub instructions: Vec<ChainInstruction>,
    pub fee_payer: String,
    pub recent_blockhash: String,
    pub compute_unit_limit: u64,
    pub compute_unit_price_micro: u64,
}

/// A built transaction plus its Ed25519 signature over the serialized
/// message.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub transaction: BuiltTransaction,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub units_consumed: Option<u64>,
    pub err: Option<String>,
}

/// Where a submitted signature currently stands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureStatus {
    pub slot: u64,
    pub commitment: Option<Commitment>,
    pub err: Option<String>,
}

impl SignatureStatus {
    pub fn satisfies(&self, wanted: Commitment) -> bool {
        self.err.is_none() && self.commitment.map(|c| c >= wanted).unwrap_or(false)
    }
}

/// Caller-declared urgency, scaling the priority fee.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn factor(&self) -> f64 {
        match self {
            Urgency::Low => 0.5,
            Urgency::Medium => 1.0,
            Urgency::High => 2.0,
        }
    }
}

/// The adapter's combined compute/fee estimate for one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub compute_unit_limit: u64,
    pub priority_fee_micro: u64,
    /// False when simulation failed and the default budget was used.
    pub simulated: bool,
}
