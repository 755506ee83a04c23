//! Request and response types for the REST surface.
//!
//! Incoming payloads enumerate their fields explicitly; unknown fields are
//! ignored on deserialization and never echoed back.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{ScanReason, ScanResult};
use crate::scan::{ScanDecision, TicketSummary};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ScanRequest {
    pub qr: String,
    pub device_id: String,
}

/// Wire shape of a scan decision.
#[derive(Debug, Serialize, ToSchema)]
pub struct ScanResponse {
    pub valid: bool,
    pub result: ScanResult,
    pub reason: ScanReason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successor_ticket_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_remaining: Option<i64>,
}

impl From<ScanDecision> for ScanResponse {
    fn from(decision: ScanDecision) -> Self {
        Self {
            valid: decision.is_allowed(),
            result: decision.result,
            reason: decision.reason,
            message: decision.message,
            ticket: decision.ticket,
            scan_count: decision.scan_count,
            successor_ticket_id: decision.successor_ticket_id,
            minutes_remaining: decision.minutes_remaining,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ManifestRequest {
    pub event_id: String,
    pub device_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MintRequest {
    pub ticket_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MintResponse {
    pub job_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
}
