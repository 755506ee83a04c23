use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::models::{Id, TenantId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanResult {
    Allow,
    Deny,
    Error,
}

impl std::fmt::Display for ScanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanResult::Allow => write!(f, "ALLOW"),
            ScanResult::Deny => write!(f, "DENY"),
            ScanResult::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for ScanResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALLOW" => Ok(ScanResult::Allow),
            "DENY" => Ok(ScanResult::Deny),
            "ERROR" => Ok(ScanResult::Error),
            _ => Err(format!("Invalid ScanResult: {}", s)),
        }
    }
}

/// Why a scan was allowed or refused. Persisted verbatim on every scan event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanReason {
    FirstEntry,
    Reentry,
    SystemError,
    QrExpired,
    QrAlreadyUsed,
    InvalidQr,
    UnauthorizedDevice,
    Unauthorized,
    VenueMismatch,
    TicketNotFound,
    WrongVenue,
    TicketRefunded,
    TicketCancelled,
    TicketTransferred,
    InvalidStatus,
    EventNotStarted,
    EventEnded,
    TicketNotYetValid,
    TicketExpired,
    WrongZone,
    NoReentry,
    ReentryDisabled,
    MaxReentriesReached,
    CooldownActive,
}

impl ScanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanReason::FirstEntry => "FIRST_ENTRY",
            ScanReason::Reentry => "REENTRY",
            ScanReason::SystemError => "SYSTEM_ERROR",
            ScanReason::QrExpired => "QR_EXPIRED",
            ScanReason::QrAlreadyUsed => "QR_ALREADY_USED",
            ScanReason::InvalidQr => "INVALID_QR",
            ScanReason::UnauthorizedDevice => "UNAUTHORIZED_DEVICE",
            ScanReason::Unauthorized => "UNAUTHORIZED",
            ScanReason::VenueMismatch => "VENUE_MISMATCH",
            ScanReason::TicketNotFound => "TICKET_NOT_FOUND",
            ScanReason::WrongVenue => "WRONG_VENUE",
            ScanReason::TicketRefunded => "TICKET_REFUNDED",
            ScanReason::TicketCancelled => "TICKET_CANCELLED",
            ScanReason::TicketTransferred => "TICKET_TRANSFERRED",
            ScanReason::InvalidStatus => "INVALID_STATUS",
            ScanReason::EventNotStarted => "EVENT_NOT_STARTED",
            ScanReason::EventEnded => "EVENT_ENDED",
            ScanReason::TicketNotYetValid => "TICKET_NOT_YET_VALID",
            ScanReason::TicketExpired => "TICKET_EXPIRED",
            ScanReason::WrongZone => "WRONG_ZONE",
            ScanReason::NoReentry => "NO_REENTRY",
            ScanReason::ReentryDisabled => "REENTRY_DISABLED",
            ScanReason::MaxReentriesReached => "MAX_REENTRIES_REACHED",
            ScanReason::CooldownActive => "COOLDOWN_ACTIVE",
        }
    }
}

impl std::fmt::Display for ScanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScanReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FIRST_ENTRY" => Ok(ScanReason::FirstEntry),
            "REENTRY" => Ok(ScanReason::Reentry),
            "SYSTEM_ERROR" => Ok(ScanReason::SystemError),
            "QR_EXPIRED" => Ok(ScanReason::QrExpired),
            "QR_ALREADY_USED" => Ok(ScanReason::QrAlreadyUsed),
            "INVALID_QR" => Ok(ScanReason::InvalidQr),
            "UNAUTHORIZED_DEVICE" => Ok(ScanReason::UnauthorizedDevice),
            "UNAUTHORIZED" => Ok(ScanReason::Unauthorized),
            "VENUE_MISMATCH" => Ok(ScanReason::VenueMismatch),
            "TICKET_NOT_FOUND" => Ok(ScanReason::TicketNotFound),
            "WRONG_VENUE" => Ok(ScanReason::WrongVenue),
            "TICKET_REFUNDED" => Ok(ScanReason::TicketRefunded),
            "TICKET_CANCELLED" => Ok(ScanReason::TicketCancelled),
            "TICKET_TRANSFERRED" => Ok(ScanReason::TicketTransferred),
            "INVALID_STATUS" => Ok(ScanReason::InvalidStatus),
            "EVENT_NOT_STARTED" => Ok(ScanReason::EventNotStarted),
            "EVENT_ENDED" => Ok(ScanReason::EventEnded),
            "TICKET_NOT_YET_VALID" => Ok(ScanReason::TicketNotYetValid),
            "TICKET_EXPIRED" => Ok(ScanReason::TicketExpired),
            "WRONG_ZONE" => Ok(ScanReason::WrongZone),
            "NO_REENTRY" => Ok(ScanReason::NoReentry),
            "REENTRY_DISABLED" => Ok(ScanReason::ReentryDisabled),
            "MAX_REENTRIES_REACHED" => Ok(ScanReason::MaxReentriesReached),
            "COOLDOWN_ACTIVE" => Ok(ScanReason::CooldownActive),
            _ => Err(format!("Invalid ScanReason: {}", s)),
        }
    }
}

/// Append-only record of one scan decision.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    pub id: Id,
    pub ticket_id: String,
    pub device_id: String,
    pub tenant_id: TenantId,
    pub result: ScanResult,
    pub reason: ScanReason,
    pub scanned_at: NaiveDateTime,
}
