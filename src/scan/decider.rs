use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use log::{error, warn};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::{self, SqlitePool};
use crate::infra::KvStore;
use crate::models::{ScanReason, StaffContext, StaffRole, TenantId, Ticket, TicketStatus};
use crate::scan::nonce::NonceRegistry;
use crate::scan::policy::{self, EntryVerdict};
use crate::scan::qr::QrPayload;
use crate::scan::types::{ScanDecision, TicketSummary};

pub const DEFAULT_ROTATION_WINDOW: Duration = Duration::from_secs(30);

/// Placeholder ids for scan events whose QR never parsed or whose device is
/// unknown; the event is still persisted for the audit trail.
const UNATTRIBUTED: &str = "unknown";

/// The per-scan validation engine.
///
/// One call to [`decide`](Self::decide) runs the full rule chain inside a
/// single database transaction and always persists a scan event before
/// replying, whatever the outcome. The engine never allows on an internal
/// error.
pub struct ScanDecider {
    db_pool: SqlitePool,
    nonces: NonceRegistry,
    rotation_window: Duration,
}

/// What the evaluation attributes the persisted scan event to.
struct Attribution {
    tenant: TenantId,
    ticket_id: String,
    device_id: String,
}

impl ScanDecider {
    pub fn new(db_pool: SqlitePool, kv: Arc<dyn KvStore>, rotation_window: Duration) -> Self {
        Self {
            db_pool,
            nonces: NonceRegistry::new(kv),
            rotation_window,
        }
    }

    /// Validates one scan and persists its outcome.
    pub async fn decide(&self, qr: &str, device_id: &str, staff: Option<&StaffContext>) -> ScanDecision {
        let request_id = Uuid::new_v4().to_string();
        let pool = self.db_pool.clone();
        let nonces = self.nonces.clone();
        let rotation_window = self.rotation_window;
        let qr = qr.to_string();
        let device_id = device_id.to_string();
        let staff = staff.cloned();

        let outcome = tokio::task::spawn_blocking(move || {
            Self::decide_blocking(&pool, &nonces, rotation_window, &qr, &device_id, staff.as_ref(), &request_id)
        })
        .await;

        match outcome {
            Ok(decision) => decision,
            Err(e) => {
                error!(error:% = e; "Scan decision task panicked");
                ScanDecision::error("Scan could not be processed")
            },
        }
    }

    fn decide_blocking(
        pool: &SqlitePool,
        nonces: &NonceRegistry,
        rotation_window: Duration,
        qr: &str,
        device_id: &str,
        staff: Option<&StaffContext>,
        request_id: &str,
    ) -> ScanDecision {
        let now = Utc::now().naive_utc();

        let mut conn = match pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                error!(request_id = request_id, error:% = e; "Scan: no database connection");
                return ScanDecision::error("Validation service unavailable");
            },
        };

        let tx = match conn.transaction() {
            Ok(tx) => tx,
            Err(e) => {
                error!(request_id = request_id, error:% = e; "Scan: could not open transaction");
                return ScanDecision::error("Validation service unavailable");
            },
        };

        let evaluated = Self::evaluate(&tx, nonces, rotation_window, qr, device_id, staff, now, request_id);

        match evaluated {
            Ok((mut decision, attribution)) => {
                // The ALLOW side effects and the event insert commit together.
                if decision.is_allowed() {
                    match db::record_allowed_scan(&tx, &attribution.tenant, &attribution.ticket_id, now) {
                        Ok(count) => decision.scan_count = Some(count),
                        Err(e) => {
                            drop(tx);
                            error!(request_id = request_id, error:% = e; "Scan: failed to record admission");
                            let decision = ScanDecision::error("Scan could not be recorded");
                            Self::persist_event_best_effort(&conn, &attribution, &decision, now, request_id);
                            return decision;
                        },
                    }
                }

                let persisted = db::insert_scan_event(
                    &tx,
                    &attribution.tenant,
                    &attribution.ticket_id,
                    &attribution.device_id,
                    decision.result,
                    decision.reason,
                    now,
                )
                .and_then(|_| tx.commit().map_err(Into::into));

                if let Err(e) = persisted {
                    error!(request_id = request_id, error:% = e; "Scan: failed to persist scan event");
                    // A decision that could not be durably recorded is not a
                    // decision; admission must fail closed.
                    return ScanDecision::error("Scan could not be recorded");
                }

                decision
            },
            Err(e) => {
                drop(tx);
                error!(request_id = request_id, error:% = e; "Scan: unexpected failure, denying");
                let decision = ScanDecision::error("Scan could not be processed");
                let attribution = Attribution {
                    tenant: TenantId::new(UNATTRIBUTED),
                    ticket_id: UNATTRIBUTED.to_string(),
                    device_id: device_id.to_string(),
                };
                Self::persist_event_best_effort(&conn, &attribution, &decision, now, request_id);
                decision
            },
        }
    }

    /// Pure rule chain. Reads only; the caller owns all writes.
    #[allow(clippy::too_many_arguments)]
    fn evaluate(
        conn: &Connection,
        nonces: &NonceRegistry,
        rotation_window: Duration,
        qr: &str,
        device_id: &str,
        staff: Option<&StaffContext>,
        now: NaiveDateTime,
        request_id: &str,
    ) -> Result<(ScanDecision, Attribution), db::CoreDbError> {
        // Device first: it anchors the tenant scope for everything after it,
        // including the audit attribution of this scan.
        let device = db::get_device(conn, device_id)?;

        let mut attribution = Attribution {
            tenant: device
                .as_ref()
                .map(|d| d.tenant_id.clone())
                .unwrap_or_else(|| TenantId::new(UNATTRIBUTED)),
            ticket_id: UNATTRIBUTED.to_string(),
            device_id: device_id.to_string(),
        };

        // 1. The payload must parse at all.
        let payload = match QrPayload::parse(qr) {
            Ok(p) => p,
            Err(_) => {
                return Ok((ScanDecision::error("Malformed QR payload"), attribution));
            },
        };
        attribution.ticket_id = payload.ticket_id.clone();

        // 2. Rotation window.
        let now_ms = Utc::now().timestamp_millis();
        if !payload.is_fresh(now_ms, rotation_window.as_millis() as i64) {
            return Ok((
                ScanDecision::deny(ScanReason::QrExpired, "QR code has expired, refresh and retry"),
                attribution,
            ));
        }

        // 3. Nonce replay. Only the first claimant proceeds.
        let claimed = nonces
            .claim(&payload.ticket_id, &payload.nonce, rotation_window)
            .map_err(|e| db::CoreDbError::Unexpected(format!("nonce store: {}", e)))?;
        if !claimed {
            return Ok((
                ScanDecision::deny(ScanReason::QrAlreadyUsed, "QR code already used"),
                attribution,
            ));
        }

        // 4. Device must exist and be active.
        let Some(device) = device else {
            return Ok((
                ScanDecision::deny(ScanReason::UnauthorizedDevice, "Unknown scanning device"),
                attribution,
            ));
        };
        if !device.is_active {
            return Ok((
                ScanDecision::deny(ScanReason::UnauthorizedDevice, "Device has been deactivated"),
                attribution,
            ));
        }
        let tenant = device.tenant_id.clone();

        // 5. Staff isolation.
        if let Some(staff) = staff {
            if staff.tenant_id != tenant {
                error!(
                    target: "audit",
                    request_id = request_id,
                    staff_id = &*staff.staff_id,
                    device_id = device_id;
                    "Cross-tenant scan attempt: staff tenant does not match device tenant"
                );
                return Ok((
                    ScanDecision::deny(ScanReason::Unauthorized, "Not authorized for this device"),
                    attribution,
                ));
            }
            if staff.role == StaffRole::Staff && staff.venue_id != device.venue_id {
                return Ok((
                    ScanDecision::deny(ScanReason::VenueMismatch, "Staff member is assigned to another venue"),
                    attribution,
                ));
            }
        }

        // 6. Ticket lookup with tenant masking: a ticket under another tenant
        //    is reported exactly like a missing one.
        let ticket = match db::get_ticket(conn, &tenant, &payload.ticket_id)? {
            Some(t) => t,
            None => {
                if db::get_ticket_unscoped(conn, &payload.ticket_id)?.is_some() {
                    error!(
                        target: "audit",
                        request_id = request_id,
                        ticket_id = &*payload.ticket_id,
                        device_id = device_id;
                        "CRITICAL: cross-tenant ticket probe blocked"
                    );
                }
                return Ok((
                    ScanDecision::deny(ScanReason::TicketNotFound, "Ticket not found"),
                    attribution,
                ));
            },
        };

        // 7. Venue isolation.
        if ticket.venue_id != device.venue_id {
            return Ok((
                ScanDecision::deny(ScanReason::WrongVenue, "Ticket belongs to a different venue"),
                attribution,
            ));
        }

        // 8. The QR signature, now that the per-ticket secret is in hand.
        if !payload.verify_signature(&ticket.qr_hmac_secret) {
            warn!(
                target: "audit",
                request_id = request_id,
                ticket_id = &*payload.ticket_id;
                "QR signature mismatch"
            );
            return Ok((
                ScanDecision::deny(ScanReason::InvalidQr, "QR code failed verification"),
                attribution,
            ));
        }

        // 9. Ticket state.
        match ticket.status {
            TicketStatus::Refunded => {
                return Ok((
                    ScanDecision::deny(ScanReason::TicketRefunded, "Ticket was refunded"),
                    attribution,
                ));
            },
            TicketStatus::Cancelled => {
                return Ok((
                    ScanDecision::deny(ScanReason::TicketCancelled, "Ticket was cancelled"),
                    attribution,
                ));
            },
            TicketStatus::Transferred => {
                let successor = db::find_transfer_successor(conn, &tenant, &ticket.id)?;
                let mut decision =
                    ScanDecision::deny(ScanReason::TicketTransferred, "Ticket was transferred to a new holder");
                decision.successor_ticket_id = successor;
                return Ok((decision, attribution));
            },
            TicketStatus::Sold | TicketStatus::Minted => {},
            TicketStatus::Reserved => {
                return Ok((
                    ScanDecision::deny(ScanReason::InvalidStatus, "Ticket is not in a scannable state"),
                    attribution,
                ));
            },
        }

        // 10. Temporal checks: event bounds, then ticket validity bounds.
        let event = db::get_event(conn, &tenant, &ticket.event_id)?
            .ok_or_else(|| db::CoreDbError::Unexpected(format!("event {} missing for ticket", ticket.event_id)))?;

        if event.starts_at > now {
            return Ok((
                ScanDecision::deny(ScanReason::EventNotStarted, "Event has not started yet"),
                attribution,
            ));
        }
        if event.ends_at < now {
            return Ok((ScanDecision::deny(ScanReason::EventEnded, "Event has ended"), attribution));
        }
        if let Some(valid_from) = ticket.valid_from {
            if valid_from > now {
                return Ok((
                    ScanDecision::deny(ScanReason::TicketNotYetValid, "Ticket is not valid yet"),
                    attribution,
                ));
            }
        }
        if let Some(valid_until) = ticket.valid_until {
            if valid_until < now {
                return Ok((
                    ScanDecision::deny(ScanReason::TicketExpired, "Ticket validity has ended"),
                    attribution,
                ));
            }
        }

        // 11. Zone admission.
        if !ticket.access_level.admits(device.zone) {
            return Ok((
                ScanDecision::deny(ScanReason::WrongZone, "Ticket does not grant access to this zone"),
                attribution,
            ));
        }

        // 12. Duplicate window and re-entry policy.
        let duplicate = db::get_duplicate_policy(conn, &tenant, &ticket.event_id)?;
        let since = now - chrono::Duration::minutes(duplicate.window_minutes);
        let prior = db::last_allowed_scan_since(conn, &tenant, &ticket.id, since)?;
        let reentry = db::get_reentry_policy(conn, &tenant, &ticket.event_id)?;

        let decision = match policy::evaluate_entry(&ticket, prior.as_ref(), reentry.as_ref(), now) {
            EntryVerdict::FirstEntry => {
                ScanDecision::allow(ScanReason::FirstEntry, Self::summarize(&ticket), ticket.scan_count + 1)
            },
            EntryVerdict::Reentry => {
                ScanDecision::allow(ScanReason::Reentry, Self::summarize(&ticket), ticket.scan_count + 1)
            },
            EntryVerdict::Deny {
                reason,
                minutes_remaining,
            } => {
                let mut decision = ScanDecision::deny(reason, Self::deny_message(reason, minutes_remaining));
                decision.minutes_remaining = minutes_remaining;
                decision
            },
        };

        Ok((decision, attribution))
    }

    fn summarize(ticket: &Ticket) -> TicketSummary {
        TicketSummary {
            id: ticket.id.clone(),
            event_id: ticket.event_id.clone(),
            status: ticket.status,
            access_level: ticket.access_level,
        }
    }

    fn deny_message(reason: ScanReason, minutes_remaining: Option<i64>) -> String {
        match reason {
            ScanReason::NoReentry => "Ticket already used for entry".to_string(),
            ScanReason::ReentryDisabled => "Re-entry is not permitted for this event".to_string(),
            ScanReason::MaxReentriesReached => "Re-entry limit reached".to_string(),
            ScanReason::CooldownActive => match minutes_remaining {
                Some(minutes) => format!("Re-entry available in {} minutes", minutes),
                None => "Re-entry cooldown is active".to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Last-resort persistence for decisions whose transaction was rolled
    /// back; failure here is logged and swallowed — the caller already holds
    /// a deny/error decision.
    fn persist_event_best_effort(
        conn: &Connection,
        attribution: &Attribution,
        decision: &ScanDecision,
        now: NaiveDateTime,
        request_id: &str,
    ) {
        if let Err(e) = db::insert_scan_event(
            conn,
            &attribution.tenant,
            &attribution.ticket_id,
            &attribution.device_id,
            decision.result,
            decision.reason,
            now,
        ) {
            error!(request_id = request_id, error:% = e; "Scan: could not persist error scan event");
        }
    }
}
