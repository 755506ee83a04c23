use std::str::FromStr;

use chrono::NaiveDateTime;
use log::debug;
use rusqlite::{Connection, OptionalExtension, named_params};

use crate::db::CoreDbResult;
use crate::models::{ScanEvent, ScanReason, ScanResult, TenantId};

pub fn insert_scan_event(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    device_id: &str,
    result: ScanResult,
    reason: ScanReason,
    scanned_at: NaiveDateTime,
) -> CoreDbResult<i64> {
    debug!(
        ticket_id = ticket_id,
        device_id = device_id,
        result:% = result,
        reason:% = reason;
        "DB: Inserting scan event"
    );

    conn.execute(
        r#"
        INSERT INTO scan_events (ticket_id, device_id, tenant_id, result, reason, scanned_at)
        VALUES (:ticket_id, :device_id, :tenant_id, :result, :reason, :scanned_at)
        "#,
        named_params! {
            ":ticket_id": ticket_id,
            ":device_id": device_id,
            ":tenant_id": tenant.as_str(),
            ":result": result.to_string(),
            ":reason": reason.to_string(),
            ":scanned_at": scanned_at.to_string(),
        },
    )?;

    Ok(conn.last_insert_rowid())
}

/// Most recent ALLOW for this ticket at or after `since`, used by the
/// duplicate-window check.
pub fn last_allowed_scan_since(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    since: NaiveDateTime,
) -> CoreDbResult<Option<ScanEvent>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT
            id,
            ticket_id,
            device_id,
            tenant_id,
            result,
            reason,
            REPLACE(scanned_at, ' ', 'T') as scanned_at
        FROM scan_events
        WHERE tenant_id = :tenant_id
          AND ticket_id = :ticket_id
          AND result = 'ALLOW'
          AND scanned_at >= :since
        ORDER BY scanned_at DESC
        LIMIT 1
        "#,
    )?;

    let row = stmt
        .query_row(
            named_params! {
                ":tenant_id": tenant.as_str(),
                ":ticket_id": ticket_id,
                ":since": since.to_string(),
            },
            |row| {
                let result_str: String = row.get(4)?;
                let reason_str: String = row.get(5)?;
                Ok(ScanEvent {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    device_id: row.get(2)?,
                    tenant_id: TenantId::new(row.get::<_, String>(3)?),
                    result: ScanResult::from_str(&result_str).unwrap_or(ScanResult::Error),
                    reason: ScanReason::from_str(&reason_str).unwrap_or(ScanReason::SystemError),
                    scanned_at: row.get(6)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}

/// Total scans and distinct devices touching one ticket since `since`.
/// Feeds the rapid-rescan and multi-device detectors.
pub fn count_ticket_scans_since(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    since: NaiveDateTime,
) -> CoreDbResult<(i64, i64)> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT COUNT(*), COUNT(DISTINCT device_id)
        FROM scan_events
        WHERE tenant_id = :tenant_id
          AND ticket_id = :ticket_id
          AND scanned_at >= :since
        "#,
    )?;

    let counts = stmt.query_row(
        named_params! {
            ":tenant_id": tenant.as_str(),
            ":ticket_id": ticket_id,
            ":since": since.to_string(),
        },
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(counts)
}

/// Total scans and denials for one device since `since`. Feeds the
/// denial-rate detector.
pub fn count_device_scans_since(
    conn: &Connection,
    tenant: &TenantId,
    device_id: &str,
    since: NaiveDateTime,
) -> CoreDbResult<(i64, i64)> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN result = 'DENY' THEN 1 ELSE 0 END), 0)
        FROM scan_events
        WHERE tenant_id = :tenant_id
          AND device_id = :device_id
          AND scanned_at >= :since
        "#,
    )?;

    let counts = stmt.query_row(
        named_params! {
            ":tenant_id": tenant.as_str(),
            ":device_id": device_id,
            ":since": since.to_string(),
        },
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(counts)
}
