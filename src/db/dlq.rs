use std::str::FromStr;

use chrono::NaiveDateTime;
use log::{info, warn};
use rusqlite::{Connection, OptionalExtension, Row, named_params};

use crate::db::CoreDbResult;
use crate::models::{DlqCategory, DlqItem, TenantId};

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<DlqItem> {
    let category_str: String = row.get(4)?;
    Ok(DlqItem {
        id: row.get(0)?,
        job_id: row.get(1)?,
        ticket_id: row.get(2)?,
        tenant_id: TenantId::new(row.get::<_, String>(3)?),
        category: DlqCategory::from_str(&category_str).unwrap_or(DlqCategory::Unknown),
        error: row.get(5)?,
        payload: row.get(6)?,
        retry_count: row.get(7)?,
        next_retry_at: row.get(8)?,
        archived: row.get(9)?,
        created_at: row.get(10)?,
    })
}

const ITEM_COLUMNS: &str = r#"
    id,
    job_id,
    ticket_id,
    tenant_id,
    category,
    error,
    payload,
    retry_count,
    REPLACE(next_retry_at, ' ', 'T') as next_retry_at,
    archived,
    REPLACE(created_at, ' ', 'T') as created_at
"#;

#[allow(clippy::too_many_arguments)]
pub fn insert_dlq_item(
    conn: &Connection,
    tenant: &TenantId,
    job_id: &str,
    ticket_id: &str,
    category: DlqCategory,
    error: &str,
    payload: Option<&str>,
    next_retry_at: Option<NaiveDateTime>,
) -> CoreDbResult<i64> {
    warn!(
        job_id = job_id,
        ticket_id = ticket_id,
        category:% = category,
        error = error;
        "DB: Dead-lettering job"
    );

    conn.execute(
        r#"
        INSERT INTO dlq_items (job_id, ticket_id, tenant_id, category, error, payload, retry_count, next_retry_at)
        VALUES (:job_id, :ticket_id, :tenant_id, :category, :error, :payload, 0, :next_retry_at)
        "#,
        named_params! {
            ":job_id": job_id,
            ":ticket_id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":category": category.to_string(),
            ":error": error,
            ":payload": payload,
            ":next_retry_at": next_retry_at.map(|t| t.to_string()),
        },
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn get_dlq_item(conn: &Connection, id: i64) -> CoreDbResult<Option<DlqItem>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {ITEM_COLUMNS} FROM dlq_items WHERE id = :id"))?;
    let item = stmt.query_row(named_params! { ":id": id }, item_from_row).optional()?;
    Ok(item)
}

/// RETRYABLE items whose `next_retry_at` has passed.
pub fn fetch_due_retries(conn: &Connection, now: NaiveDateTime, limit: i64) -> CoreDbResult<Vec<DlqItem>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {ITEM_COLUMNS} FROM dlq_items
        WHERE archived = 0
          AND category = 'RETRYABLE'
          AND next_retry_at IS NOT NULL
          AND next_retry_at <= :now
        ORDER BY next_retry_at ASC
        LIMIT :limit
        "#
    ))?;

    let rows = stmt.query_map(
        named_params! { ":now": now.to_string(), ":limit": limit },
        item_from_row,
    )?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

pub fn reschedule_retry(
    conn: &Connection,
    id: i64,
    retry_count: i64,
    next_retry_at: NaiveDateTime,
    error: &str,
) -> CoreDbResult<()> {
    conn.execute(
        r#"
        UPDATE dlq_items
        SET retry_count = :retry_count,
            next_retry_at = :next_retry_at,
            error = :error,
            updated_at = datetime('now')
        WHERE id = :id
        "#,
        named_params! {
            ":id": id,
            ":retry_count": retry_count,
            ":next_retry_at": next_retry_at.to_string(),
            ":error": error,
        },
    )?;
    Ok(())
}

/// A job that burned through its retry budget stops being scheduled and waits
/// for manual review.
pub fn promote_to_non_retryable(conn: &Connection, id: i64, error: &str) -> CoreDbResult<()> {
    warn!(id = id, error = error; "DB: DLQ item exhausted retries, promoting to NON_RETRYABLE");

    conn.execute(
        r#"
        UPDATE dlq_items
        SET category = 'NON_RETRYABLE',
            next_retry_at = NULL,
            error = :error,
            updated_at = datetime('now')
        WHERE id = :id
        "#,
        named_params! { ":id": id, ":error": error },
    )?;
    Ok(())
}

/// Removes a successfully retried item from the queue.
pub fn resolve_dlq_item(conn: &Connection, id: i64) -> CoreDbResult<()> {
    info!(id = id; "DB: DLQ item resolved");
    conn.execute("DELETE FROM dlq_items WHERE id = :id", named_params! { ":id": id })?;
    Ok(())
}

/// NON_RETRYABLE items older than the cutoff are flagged archived; UNKNOWN
/// items are left pending review indefinitely.
pub fn archive_non_retryable_older_than(conn: &Connection, cutoff: NaiveDateTime) -> CoreDbResult<usize> {
    let count = conn.execute(
        r#"
        UPDATE dlq_items
        SET archived = 1, updated_at = datetime('now')
        WHERE archived = 0
          AND category = 'NON_RETRYABLE'
          AND created_at < :cutoff
        "#,
        named_params! { ":cutoff": cutoff.to_string() },
    )?;
    Ok(count)
}
