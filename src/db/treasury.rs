use chrono::NaiveDateTime;
use rusqlite::{Connection, named_params};

use crate::db::CoreDbResult;

/// One persisted treasury alert row (the monitor also keeps an in-memory
/// ring of the most recent alerts for the admin surface).
#[derive(Debug, Clone)]
pub struct TreasuryAlertRow {
    pub id: i64,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub amount_lamports: Option<i64>,
    pub raised_at: NaiveDateTime,
}

pub fn insert_treasury_alert(
    conn: &Connection,
    alert_type: &str,
    severity: &str,
    message: &str,
    amount_lamports: Option<i64>,
) -> CoreDbResult<i64> {
    conn.execute(
        r#"
        INSERT INTO treasury_alerts (alert_type, severity, message, amount_lamports)
        VALUES (:alert_type, :severity, :message, :amount)
        "#,
        named_params! {
            ":alert_type": alert_type,
            ":severity": severity,
            ":message": message,
            ":amount": amount_lamports,
        },
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_recent_treasury_alerts(conn: &Connection, limit: i64) -> CoreDbResult<Vec<TreasuryAlertRow>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT
            id,
            alert_type,
            severity,
            message,
            amount_lamports,
            REPLACE(raised_at, ' ', 'T') as raised_at
        FROM treasury_alerts
        ORDER BY id DESC
        LIMIT :limit
        "#,
    )?;

    let rows = stmt.query_map(named_params! { ":limit": limit }, |row| {
        Ok(TreasuryAlertRow {
            id: row.get(0)?,
            alert_type: row.get(1)?,
            severity: row.get(2)?,
            message: row.get(3)?,
            amount_lamports: row.get(4)?,
            raised_at: row.get(5)?,
        })
    })?;

    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(row?);
    }
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;

    #[test]
    fn test_alert_history() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();

        insert_treasury_alert(&conn, "LOW_BALANCE", "warning", "balance below 1 SOL", Some(900_000_000)).unwrap();
        insert_treasury_alert(&conn, "RAPID_DRAIN", "critical", "2.5 SOL out in 1h", Some(2_500_000_000)).unwrap();

        let alerts = get_recent_treasury_alerts(&conn, 10).unwrap();
        assert_eq!(alerts.len(), 2);
        // Most recent first.
        assert_eq!(alerts[0].alert_type, "RAPID_DRAIN");
        assert_eq!(alerts[1].amount_lamports, Some(900_000_000));
    }
}
