use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::models::TenantId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Reserved,
    Sold,
    Minted,
    Transferred,
    Refunded,
    Cancelled,
}

impl TicketStatus {
    /// REFUNDED and CANCELLED never leave that state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Refunded | TicketStatus::Cancelled)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketStatus::Reserved => write!(f, "RESERVED"),
            TicketStatus::Sold => write!(f, "SOLD"),
            TicketStatus::Minted => write!(f, "MINTED"),
            TicketStatus::Transferred => write!(f, "TRANSFERRED"),
            TicketStatus::Refunded => write!(f, "REFUNDED"),
            TicketStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESERVED" => Ok(TicketStatus::Reserved),
            "SOLD" => Ok(TicketStatus::Sold),
            "MINTED" => Ok(TicketStatus::Minted),
            "TRANSFERRED" => Ok(TicketStatus::Transferred),
            "REFUNDED" => Ok(TicketStatus::Refunded),
            "CANCELLED" => Ok(TicketStatus::Cancelled),
            _ => Err(format!("Invalid TicketStatus: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    Ga,
    Vip,
    Backstage,
    All,
}

impl AccessLevel {
    /// Zone admission matrix: BACKSTAGE holders enter backstage only, VIP
    /// covers VIP and GA, GA covers GA, ALL enters anywhere.
    pub fn admits(&self, zone: Zone) -> bool {
        match self {
            AccessLevel::Backstage => zone == Zone::Backstage,
            AccessLevel::Vip => matches!(zone, Zone::Vip | Zone::Ga),
            AccessLevel::Ga => zone == Zone::Ga,
            AccessLevel::All => true,
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessLevel::Ga => write!(f, "GA"),
            AccessLevel::Vip => write!(f, "VIP"),
            AccessLevel::Backstage => write!(f, "BACKSTAGE"),
            AccessLevel::All => write!(f, "ALL"),
        }
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GA" => Ok(AccessLevel::Ga),
            "VIP" => Ok(AccessLevel::Vip),
            "BACKSTAGE" => Ok(AccessLevel::Backstage),
            "ALL" => Ok(AccessLevel::All),
            _ => Err(format!("Invalid AccessLevel: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    Ga,
    Vip,
    Backstage,
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Zone::Ga => write!(f, "GA"),
            Zone::Vip => write!(f, "VIP"),
            Zone::Backstage => write!(f, "BACKSTAGE"),
        }
    }
}

impl FromStr for Zone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GA" => Ok(Zone::Ga),
            "VIP" => Ok(Zone::Vip),
            "BACKSTAGE" => Ok(Zone::Backstage),
            _ => Err(format!("Invalid Zone: {}", s)),
        }
    }
}

/// One admission ticket, scoped to a tenant and an event.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: String,
    pub tenant_id: TenantId,
    pub event_id: String,
    pub venue_id: String,
    pub status: TicketStatus,
    pub access_level: AccessLevel,
    pub qr_hmac_secret: Vec<u8>,
    pub valid_from: Option<NaiveDateTime>,
    pub valid_until: Option<NaiveDateTime>,
    pub scan_count: i64,
    pub last_scanned_at: Option<NaiveDateTime>,
    pub is_minted: bool,
    pub mint_address: Option<String>,
    pub mint_tx_id: Option<String>,
}

/// A registered scanner device. Revocation is soft; a revoked device id is
/// never reactivated.
#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: String,
    pub tenant_id: TenantId,
    pub venue_id: String,
    pub zone: Zone,
    pub is_active: bool,
    pub can_scan_offline: bool,
    pub last_sync_at: Option<NaiveDateTime>,
    pub revoked_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: String,
    pub tenant_id: TenantId,
    pub venue_id: String,
    pub name: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
}
