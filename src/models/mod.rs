//! Domain models shared across the scan and mint pipelines.

mod anomaly;
mod mint;
mod scan;
mod ticket;
mod wallet;

pub use anomaly::{AnomalyFinding, Detector, Severity};
pub use mint::{DlqCategory, DlqItem, MintTransaction, RecoveryPoint, TxStatus, TxType};
pub use scan::{ScanEvent, ScanReason, ScanResult};
pub use ticket::{AccessLevel, Device, EventRow, Ticket, TicketStatus, Zone};
pub use wallet::{CustodialWallet, WalletKey, WalletStatus};

use serde::{Deserialize, Serialize};

// Change depending on sql type.
pub type Id = i64;

/// Tenant scope for every row-level-isolated query.
///
/// The database layer refuses to touch tenant-scoped tables without one of
/// these: the tenant id is always bound as a query parameter, never carried in
/// ambient session state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Authenticated staff member attached to an inbound scan request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffContext {
    pub staff_id: String,
    pub tenant_id: TenantId,
    pub venue_id: String,
    pub role: StaffRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Staff,
    TenantAdmin,
    PlatformAdmin,
}

impl std::fmt::Display for StaffRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaffRole::Staff => write!(f, "staff"),
            StaffRole::TenantAdmin => write!(f, "tenant_admin"),
            StaffRole::PlatformAdmin => write!(f, "platform_admin"),
        }
    }
}
