use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{AccessLevel, ScanReason, ScanResult, TicketStatus};

/// Compact ticket view attached to scan responses. Never includes the HMAC
/// secret or anything tenant-revealing beyond what the scanner already knows.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TicketSummary {
    pub id: String,
    pub event_id: String,
    pub status: TicketStatus,
    pub access_level: AccessLevel,
}

/// The outcome of one scan: what happened, why, and what the gate display
/// should show.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanDecision {
    pub result: ScanResult,
    pub reason: ScanReason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_count: Option<i64>,
    /// For TICKET_TRANSFERRED: the ticket that superseded this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successor_ticket_id: Option<String>,
    /// For COOLDOWN_ACTIVE: whole minutes until re-entry is allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_remaining: Option<i64>,
}

impl ScanDecision {
    pub fn allow(reason: ScanReason, ticket: TicketSummary, scan_count: i64) -> Self {
        Self {
            result: ScanResult::Allow,
            reason,
            message: match reason {
                ScanReason::FirstEntry => "Entry granted".to_string(),
                _ => "Re-entry granted".to_string(),
            },
            ticket: Some(ticket),
            scan_count: Some(scan_count),
            successor_ticket_id: None,
            minutes_remaining: None,
        }
    }

    pub fn deny(reason: ScanReason, message: impl Into<String>) -> Self {
        Self {
            result: ScanResult::Deny,
            reason,
            message: message.into(),
            ticket: None,
            scan_count: None,
            successor_ticket_id: None,
            minutes_remaining: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: ScanResult::Error,
            reason: ScanReason::SystemError,
            message: message.into(),
            ticket: None,
            scan_count: None,
            successor_ticket_id: None,
            minutes_remaining: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.result == ScanResult::Allow
    }
}
