use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::TenantId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    Active,
    Suspended,
    Locked,
    Archived,
}

impl WalletStatus {
    /// SUSPENDED and LOCKED wallets can return to ACTIVE; ARCHIVED cannot.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WalletStatus::Active | WalletStatus::Suspended | WalletStatus::Locked)
    }
}

impl std::fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletStatus::Active => write!(f, "ACTIVE"),
            WalletStatus::Suspended => write!(f, "SUSPENDED"),
            WalletStatus::Locked => write!(f, "LOCKED"),
            WalletStatus::Archived => write!(f, "ARCHIVED"),
        }
    }
}

impl FromStr for WalletStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(WalletStatus::Active),
            "SUSPENDED" => Ok(WalletStatus::Suspended),
            "LOCKED" => Ok(WalletStatus::Locked),
            "ARCHIVED" => Ok(WalletStatus::Archived),
            _ => Err(format!("Invalid WalletStatus: {}", s)),
        }
    }
}

/// Custodial wallet metadata; the key material lives in [`WalletKey`].
#[derive(Debug, Clone)]
pub struct CustodialWallet {
    pub id: String,
    pub user_id: String,
    pub tenant_id: TenantId,
    pub address: String,
    pub status: WalletStatus,
    pub kms_key_id: String,
    pub key_version: i64,
}

/// Envelope-encrypted private key. The plaintext secret only ever exists in a
/// zeroized scratch buffer during signing.
#[derive(Debug, Clone)]
pub struct WalletKey {
    pub wallet_id: String,
    pub encrypted_secret: Vec<u8>,
    pub encrypted_data_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub last_accessed_at: Option<NaiveDateTime>,
    pub last_access_reason: Option<String>,
    pub access_count: i64,
}
