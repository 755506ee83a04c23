use std::str::FromStr;

use chrono::NaiveDateTime;
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, Row, named_params};

use crate::db::{CoreDbError, CoreDbResult};
use crate::models::{AccessLevel, TenantId, Ticket, TicketStatus};

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    let status_str: String = row.get(4)?;
    let level_str: String = row.get(5)?;
    Ok(Ticket {
        id: row.get(0)?,
        tenant_id: TenantId::new(row.get::<_, String>(1)?),
        event_id: row.get(2)?,
        venue_id: row.get(3)?,
        status: TicketStatus::from_str(&status_str).unwrap_or(TicketStatus::Cancelled),
        access_level: AccessLevel::from_str(&level_str).unwrap_or(AccessLevel::Ga),
        qr_hmac_secret: row.get(6)?,
        valid_from: row.get(7)?,
        valid_until: row.get(8)?,
        scan_count: row.get(9)?,
        last_scanned_at: row.get(10)?,
        is_minted: row.get(11)?,
        mint_address: row.get(12)?,
        mint_tx_id: row.get(13)?,
    })
}

const TICKET_COLUMNS: &str = r#"
    id,
    tenant_id,
    event_id,
    venue_id,
    status,
    access_level,
    qr_hmac_secret,
    REPLACE(valid_from, ' ', 'T') as valid_from,
    REPLACE(valid_until, ' ', 'T') as valid_until,
    scan_count,
    REPLACE(last_scanned_at, ' ', 'T') as last_scanned_at,
    is_minted,
    mint_address,
    mint_tx_id
"#;

#[allow(clippy::too_many_arguments)]
pub fn insert_ticket(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    event_id: &str,
    venue_id: &str,
    status: TicketStatus,
    access_level: AccessLevel,
    qr_hmac_secret: &[u8],
) -> CoreDbResult<()> {
    if qr_hmac_secret.len() < 32 {
        return Err(CoreDbError::InvalidInput(
            "qr_hmac_secret must be at least 32 bytes".to_string(),
        ));
    }

    conn.execute(
        r#"
        INSERT INTO tickets (id, tenant_id, event_id, venue_id, status, access_level, qr_hmac_secret)
        VALUES (:id, :tenant_id, :event_id, :venue_id, :status, :access_level, :secret)
        "#,
        named_params! {
            ":id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":event_id": event_id,
            ":venue_id": venue_id,
            ":status": status.to_string(),
            ":access_level": access_level.to_string(),
            ":secret": qr_hmac_secret,
        },
    )?;
    Ok(())
}

pub fn get_ticket(conn: &Connection, tenant: &TenantId, ticket_id: &str) -> CoreDbResult<Option<Ticket>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = :id AND tenant_id = :tenant_id"
    ))?;

    let row = stmt
        .query_row(
            named_params! { ":id": ticket_id, ":tenant_id": tenant.as_str() },
            ticket_from_row,
        )
        .optional()?;

    Ok(row)
}

/// Lookup without the tenant filter.
///
/// Exists solely so the scan decider can tell a missing ticket apart from a
/// cross-tenant probe and raise the audit log; the row never leaves the
/// decider when tenants mismatch.
pub fn get_ticket_unscoped(conn: &Connection, ticket_id: &str) -> CoreDbResult<Option<Ticket>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = :id"))?;

    let row = stmt
        .query_row(named_params! { ":id": ticket_id }, ticket_from_row)
        .optional()?;

    Ok(row)
}

pub fn update_ticket_status(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    status: TicketStatus,
) -> CoreDbResult<()> {
    debug!(ticket_id = ticket_id, status:% = status; "DB: Updating ticket status");

    conn.execute(
        r#"
        UPDATE tickets
        SET status = :status, updated_at = datetime('now')
        WHERE id = :id AND tenant_id = :tenant_id
        "#,
        named_params! {
            ":id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":status": status.to_string(),
        },
    )?;
    Ok(())
}

/// Applies the admitted-entry side effect: bump `scan_count` and stamp
/// `last_scanned_at`. Call inside the same transaction that inserts the
/// ALLOW scan event.
pub fn record_allowed_scan(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    at: NaiveDateTime,
) -> CoreDbResult<i64> {
    conn.execute(
        r#"
        UPDATE tickets
        SET scan_count = scan_count + 1,
            last_scanned_at = :at,
            updated_at = datetime('now')
        WHERE id = :id AND tenant_id = :tenant_id
        "#,
        named_params! {
            ":id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":at": at.to_string(),
        },
    )?;

    let count: i64 = conn.query_row(
        "SELECT scan_count FROM tickets WHERE id = :id AND tenant_id = :tenant_id",
        named_params! { ":id": ticket_id, ":tenant_id": tenant.as_str() },
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Finalizes a mint: flips `is_minted` and records where the token landed.
pub fn mark_ticket_minted(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    mint_address: &str,
    mint_tx_id: &str,
) -> CoreDbResult<()> {
    info!(
        target: "audit",
        ticket_id = ticket_id,
        mint_address = mint_address;
        "DB: Marking ticket minted"
    );

    conn.execute(
        r#"
        UPDATE tickets
        SET status = :status,
            is_minted = 1,
            mint_address = :mint_address,
            mint_tx_id = :mint_tx_id,
            updated_at = datetime('now')
        WHERE id = :id AND tenant_id = :tenant_id
        "#,
        named_params! {
            ":id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":status": TicketStatus::Minted.to_string(),
            ":mint_address": mint_address,
            ":mint_tx_id": mint_tx_id,
        },
    )?;
    Ok(())
}

pub fn record_transfer(
    conn: &Connection,
    tenant: &TenantId,
    from_ticket_id: &str,
    to_ticket_id: &str,
) -> CoreDbResult<()> {
    conn.execute(
        r#"
        INSERT INTO ticket_transfers (tenant_id, from_ticket_id, to_ticket_id)
        VALUES (:tenant_id, :from, :to)
        "#,
        named_params! {
            ":tenant_id": tenant.as_str(),
            ":from": from_ticket_id,
            ":to": to_ticket_id,
        },
    )?;
    conn.execute(
        r#"
        UPDATE tickets SET status = :status, updated_at = datetime('now')
        WHERE id = :from AND tenant_id = :tenant_id
        "#,
        named_params! {
            ":tenant_id": tenant.as_str(),
            ":from": from_ticket_id,
            ":status": TicketStatus::Transferred.to_string(),
        },
    )?;
    Ok(())
}

/// All SOLD or MINTED tickets for one event, in id order. Feeds the offline
/// manifest builder.
pub fn get_scannable_event_tickets(conn: &Connection, tenant: &TenantId, event_id: &str) -> CoreDbResult<Vec<Ticket>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {TICKET_COLUMNS} FROM tickets
        WHERE tenant_id = :tenant_id
          AND event_id = :event_id
          AND status IN ('SOLD', 'MINTED')
        ORDER BY id
        "#
    ))?;

    let rows = stmt.query_map(
        named_params! { ":tenant_id": tenant.as_str(), ":event_id": event_id },
        ticket_from_row,
    )?;

    let mut tickets = Vec::new();
    for row in rows {
        tickets.push(row?);
    }
    Ok(tickets)
}

/// For a TRANSFERRED ticket, returns the id of the ticket that superseded it.
pub fn find_transfer_successor(
    conn: &Connection,
    tenant: &TenantId,
    from_ticket_id: &str,
) -> CoreDbResult<Option<String>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT to_ticket_id FROM ticket_transfers
        WHERE tenant_id = :tenant_id AND from_ticket_id = :from
        ORDER BY id DESC
        LIMIT 1
        "#,
    )?;

    let successor = stmt
        .query_row(
            named_params! { ":tenant_id": tenant.as_str(), ":from": from_ticket_id },
            |row| row.get(0),
        )
        .optional()?;

    Ok(successor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use chrono::Utc;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_ticket_roundtrip() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        insert_ticket(&conn, &tenant, "tk-1", "ev-1", "v-1", TicketStatus::Sold, AccessLevel::Vip, SECRET).unwrap();

        let ticket = get_ticket(&conn, &tenant, "tk-1").unwrap().expect("ticket missing");
        assert_eq!(ticket.status, TicketStatus::Sold);
        assert_eq!(ticket.access_level, AccessLevel::Vip);
        assert_eq!(ticket.scan_count, 0);
        assert!(!ticket.is_minted);
    }

    #[test]
    fn test_short_secret_rejected() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        let err = insert_ticket(
            &conn, &tenant, "tk-1", "ev-1", "v-1", TicketStatus::Sold, AccessLevel::Ga, b"short",
        )
        .unwrap_err();
        assert!(matches!(err, CoreDbError::InvalidInput(_)));
    }

    #[test]
    fn test_cross_tenant_lookup_is_masked() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");
        let other = TenantId::new("t-2");

        insert_ticket(&conn, &tenant, "tk-1", "ev-1", "v-1", TicketStatus::Sold, AccessLevel::Ga, SECRET).unwrap();

        assert!(get_ticket(&conn, &other, "tk-1").unwrap().is_none());
        // The unscoped lookup still sees it, which is what lets the decider
        // log the cross-tenant probe.
        assert!(get_ticket_unscoped(&conn, "tk-1").unwrap().is_some());
    }

    #[test]
    fn test_record_allowed_scan_increments() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        insert_ticket(&conn, &tenant, "tk-1", "ev-1", "v-1", TicketStatus::Sold, AccessLevel::Ga, SECRET).unwrap();

        let now = Utc::now().naive_utc();
        assert_eq!(record_allowed_scan(&conn, &tenant, "tk-1", now).unwrap(), 1);
        assert_eq!(record_allowed_scan(&conn, &tenant, "tk-1", now).unwrap(), 2);

        let ticket = get_ticket(&conn, &tenant, "tk-1").unwrap().unwrap();
        assert_eq!(ticket.scan_count, 2);
        assert!(ticket.last_scanned_at.is_some());
    }

    #[test]
    fn test_transfer_successor_lookup() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        insert_ticket(&conn, &tenant, "tk-1", "ev-1", "v-1", TicketStatus::Sold, AccessLevel::Ga, SECRET).unwrap();
        insert_ticket(&conn, &tenant, "tk-2", "ev-1", "v-1", TicketStatus::Sold, AccessLevel::Ga, SECRET).unwrap();

        record_transfer(&conn, &tenant, "tk-1", "tk-2").unwrap();

        let ticket = get_ticket(&conn, &tenant, "tk-1").unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Transferred);
        assert_eq!(
            find_transfer_successor(&conn, &tenant, "tk-1").unwrap().as_deref(),
            Some("tk-2")
        );
    }

    #[test]
    fn test_mark_ticket_minted() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        insert_ticket(&conn, &tenant, "tk-1", "ev-1", "v-1", TicketStatus::Sold, AccessLevel::Ga, SECRET).unwrap();
        mark_ticket_minted(&conn, &tenant, "tk-1", "MintAddr111", "5igSig111").unwrap();

        let ticket = get_ticket(&conn, &tenant, "tk-1").unwrap().unwrap();
        assert!(ticket.is_minted);
        assert_eq!(ticket.status, TicketStatus::Minted);
        assert_eq!(ticket.mint_address.as_deref(), Some("MintAddr111"));
        assert_eq!(ticket.mint_tx_id.as_deref(), Some("5igSig111"));
    }
}
