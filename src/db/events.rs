use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, named_params};

use crate::db::CoreDbResult;
use crate::models::{EventRow, TenantId};

pub fn insert_event(
    conn: &Connection,
    tenant: &TenantId,
    event_id: &str,
    venue_id: &str,
    name: &str,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
) -> CoreDbResult<()> {
    conn.execute(
        r#"
        INSERT INTO events (id, tenant_id, venue_id, name, starts_at, ends_at)
        VALUES (:id, :tenant_id, :venue_id, :name, :starts_at, :ends_at)
        "#,
        named_params! {
            ":id": event_id,
            ":tenant_id": tenant.as_str(),
            ":venue_id": venue_id,
            ":name": name,
            ":starts_at": starts_at.to_string(),
            ":ends_at": ends_at.to_string(),
        },
    )?;
    Ok(())
}

pub fn get_event(conn: &Connection, tenant: &TenantId, event_id: &str) -> CoreDbResult<Option<EventRow>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT
            id,
            tenant_id,
            venue_id,
            name,
            REPLACE(starts_at, ' ', 'T') as starts_at,
            REPLACE(ends_at, ' ', 'T') as ends_at
        FROM events
        WHERE id = :id AND tenant_id = :tenant_id
        "#,
    )?;

    let row = stmt
        .query_row(
            named_params! { ":id": event_id, ":tenant_id": tenant.as_str() },
            |row| {
                Ok(EventRow {
                    id: row.get(0)?,
                    tenant_id: TenantId::new(row.get::<_, String>(1)?),
                    venue_id: row.get(2)?,
                    name: row.get(3)?,
                    starts_at: row.get(4)?,
                    ends_at: row.get(5)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}
