use log::warn;
use rusqlite::{Connection, named_params};
use serde_rusqlite::from_row;

use crate::db::CoreDbResult;
use crate::models::{AnomalyFinding, Detector, Severity, TenantId};

/// Persists one high-risk finding. Only findings that cleared the risk
/// threshold reach this table; low scores stay in the logs.
pub fn insert_finding(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    device_id: &str,
    detector: Detector,
    severity: Severity,
    risk_score: u32,
    details: Option<&str>,
) -> CoreDbResult<i64> {
    warn!(
        target: "audit",
        ticket_id = ticket_id,
        device_id = device_id,
        detector:% = detector,
        severity:% = severity,
        risk_score = risk_score;
        "Anomaly finding recorded"
    );

    conn.execute(
        r#"
        INSERT INTO anomaly_findings (tenant_id, ticket_id, device_id, detector, severity, risk_score, details)
        VALUES (:tenant_id, :ticket_id, :device_id, :detector, :severity, :risk_score, :details)
        "#,
        named_params! {
            ":tenant_id": tenant.as_str(),
            ":ticket_id": ticket_id,
            ":device_id": device_id,
            ":detector": detector.to_string(),
            ":severity": severity.to_string(),
            ":risk_score": risk_score,
            ":details": details,
        },
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn get_findings_for_tenant(conn: &Connection, tenant: &TenantId, limit: i64) -> CoreDbResult<Vec<AnomalyFinding>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT
            id,
            tenant_id,
            ticket_id,
            device_id,
            detector,
            severity,
            risk_score,
            details,
            REPLACE(detected_at, ' ', 'T') as detected_at
        FROM anomaly_findings
        WHERE tenant_id = :tenant_id
        ORDER BY detected_at DESC
        LIMIT :limit
        "#,
    )?;

    let rows = stmt.query_and_then(
        named_params! { ":tenant_id": tenant.as_str(), ":limit": limit },
        from_row::<AnomalyFinding>,
    )?;

    let mut findings = Vec::new();
    for row in rows {
        findings.push(row?);
    }
    Ok(findings)
}
