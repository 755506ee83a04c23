use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::models::{Id, TenantId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Mint,
    Transfer,
    Burn,
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxType::Mint => write!(f, "MINT"),
            TxType::Transfer => write!(f, "TRANSFER"),
            TxType::Burn => write!(f, "BURN"),
        }
    }
}

impl FromStr for TxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINT" => Ok(TxType::Mint),
            "TRANSFER" => Ok(TxType::Transfer),
            "BURN" => Ok(TxType::Burn),
            _ => Err(format!("Invalid TxType: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Minting,
    Processing,
    Confirmed,
    Finalized,
    Failed,
    Expired,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStatus::Pending => write!(f, "PENDING"),
            TxStatus::Minting => write!(f, "MINTING"),
            TxStatus::Processing => write!(f, "PROCESSING"),
            TxStatus::Confirmed => write!(f, "CONFIRMED"),
            TxStatus::Finalized => write!(f, "FINALIZED"),
            TxStatus::Failed => write!(f, "FAILED"),
            TxStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TxStatus::Pending),
            "MINTING" => Ok(TxStatus::Minting),
            "PROCESSING" => Ok(TxStatus::Processing),
            "CONFIRMED" => Ok(TxStatus::Confirmed),
            "FINALIZED" => Ok(TxStatus::Finalized),
            "FAILED" => Ok(TxStatus::Failed),
            "EXPIRED" => Ok(TxStatus::Expired),
            _ => Err(format!("Invalid TxStatus: {}", s)),
        }
    }
}

/// Durable checkpoint naming the furthest step a mint job has completed.
///
/// The orchestrator is a reducer over these points: load the recovery state,
/// match on the point, perform one step's effect, checkpoint the next point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryPoint {
    Initiated,
    Validated,
    Locked,
    TicketReserved,
    MetadataUploaded,
    TxBuilt,
    TxSubmitted,
    TxConfirmed,
    DbUpdated,
    Completed,
    Failed,
}

impl RecoveryPoint {
    /// COMPLETED and FAILED jobs are never resumed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryPoint::Completed | RecoveryPoint::Failed)
    }
}

impl std::fmt::Display for RecoveryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryPoint::Initiated => write!(f, "INITIATED"),
            RecoveryPoint::Validated => write!(f, "VALIDATED"),
            RecoveryPoint::Locked => write!(f, "LOCKED"),
            RecoveryPoint::TicketReserved => write!(f, "TICKET_RESERVED"),
            RecoveryPoint::MetadataUploaded => write!(f, "METADATA_UPLOADED"),
            RecoveryPoint::TxBuilt => write!(f, "TX_BUILT"),
            RecoveryPoint::TxSubmitted => write!(f, "TX_SUBMITTED"),
            RecoveryPoint::TxConfirmed => write!(f, "TX_CONFIRMED"),
            RecoveryPoint::DbUpdated => write!(f, "DB_UPDATED"),
            RecoveryPoint::Completed => write!(f, "COMPLETED"),
            RecoveryPoint::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for RecoveryPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIATED" => Ok(RecoveryPoint::Initiated),
            "VALIDATED" => Ok(RecoveryPoint::Validated),
            "LOCKED" => Ok(RecoveryPoint::Locked),
            "TICKET_RESERVED" => Ok(RecoveryPoint::TicketReserved),
            "METADATA_UPLOADED" => Ok(RecoveryPoint::MetadataUploaded),
            "TX_BUILT" => Ok(RecoveryPoint::TxBuilt),
            "TX_SUBMITTED" => Ok(RecoveryPoint::TxSubmitted),
            "TX_CONFIRMED" => Ok(RecoveryPoint::TxConfirmed),
            "DB_UPDATED" => Ok(RecoveryPoint::DbUpdated),
            "COMPLETED" => Ok(RecoveryPoint::Completed),
            "FAILED" => Ok(RecoveryPoint::Failed),
            _ => Err(format!("Invalid RecoveryPoint: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DlqCategory {
    Retryable,
    NonRetryable,
    Unknown,
}

impl std::fmt::Display for DlqCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DlqCategory::Retryable => write!(f, "RETRYABLE"),
            DlqCategory::NonRetryable => write!(f, "NON_RETRYABLE"),
            DlqCategory::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for DlqCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RETRYABLE" => Ok(DlqCategory::Retryable),
            "NON_RETRYABLE" => Ok(DlqCategory::NonRetryable),
            "UNKNOWN" => Ok(DlqCategory::Unknown),
            _ => Err(format!("Invalid DlqCategory: {}", s)),
        }
    }
}

/// One row of `chain_transactions`; unique per `(ticket_id, tenant_id, tx_type)`.
#[derive(Debug, Clone)]
pub struct MintTransaction {
    pub id: Id,
    pub ticket_id: String,
    pub tenant_id: TenantId,
    pub tx_type: TxType,
    pub status: TxStatus,
    pub signature: Option<String>,
    pub mint_address: Option<String>,
    pub slot_number: i64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DlqItem {
    pub id: Id,
    pub job_id: String,
    pub ticket_id: String,
    pub tenant_id: TenantId,
    pub category: DlqCategory,
    pub error: String,
    pub payload: Option<String>,
    pub retry_count: i64,
    pub next_retry_at: Option<NaiveDateTime>,
    pub archived: bool,
    pub created_at: NaiveDateTime,
}
