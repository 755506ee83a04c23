use std::str::FromStr;

use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, Row, named_params};

use crate::db::CoreDbResult;
use crate::models::{MintTransaction, TenantId, TxStatus, TxType};

fn tx_from_row(row: &Row<'_>) -> rusqlite::Result<MintTransaction> {
    let type_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    Ok(MintTransaction {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        tenant_id: TenantId::new(row.get::<_, String>(2)?),
        tx_type: TxType::from_str(&type_str).unwrap_or(TxType::Mint),
        status: TxStatus::from_str(&status_str).unwrap_or(TxStatus::Failed),
        signature: row.get(5)?,
        mint_address: row.get(6)?,
        slot_number: row.get(7)?,
        last_error: row.get(8)?,
    })
}

const TX_COLUMNS: &str =
    "id, ticket_id, tenant_id, tx_type, status, signature, mint_address, slot_number, last_error";

/// Reserve step: ensures exactly one row per `(ticket, tenant, type)` and
/// resets it to PENDING when a previous attempt left it FAILED or EXPIRED.
/// A row in any in-flight or terminal-success state is left untouched.
pub fn upsert_pending_transaction(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    tx_type: TxType,
) -> CoreDbResult<MintTransaction> {
    conn.execute(
        r#"
        INSERT INTO chain_transactions (ticket_id, tenant_id, tx_type, status)
        VALUES (:ticket_id, :tenant_id, :tx_type, :pending)
        ON CONFLICT (ticket_id, tenant_id, tx_type)
        DO UPDATE SET
            status = CASE WHEN status IN ('FAILED', 'EXPIRED') THEN :pending ELSE status END,
            last_error = CASE WHEN status IN ('FAILED', 'EXPIRED') THEN NULL ELSE last_error END,
            updated_at = datetime('now')
        "#,
        named_params! {
            ":ticket_id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":tx_type": tx_type.to_string(),
            ":pending": TxStatus::Pending.to_string(),
        },
    )?;

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TX_COLUMNS} FROM chain_transactions
         WHERE ticket_id = :ticket_id AND tenant_id = :tenant_id AND tx_type = :tx_type"
    ))?;
    let tx = stmt.query_row(
        named_params! {
            ":ticket_id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":tx_type": tx_type.to_string(),
        },
        tx_from_row,
    )?;

    Ok(tx)
}

pub fn get_chain_transaction(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    tx_type: TxType,
) -> CoreDbResult<Option<MintTransaction>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TX_COLUMNS} FROM chain_transactions
         WHERE ticket_id = :ticket_id AND tenant_id = :tenant_id AND tx_type = :tx_type"
    ))?;

    let tx = stmt
        .query_row(
            named_params! {
                ":ticket_id": ticket_id,
                ":tenant_id": tenant.as_str(),
                ":tx_type": tx_type.to_string(),
            },
            tx_from_row,
        )
        .optional()?;

    Ok(tx)
}

pub fn set_transaction_status(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    tx_type: TxType,
    status: TxStatus,
) -> CoreDbResult<()> {
    debug!(ticket_id = ticket_id, status:% = status; "DB: Updating chain transaction status");

    conn.execute(
        r#"
        UPDATE chain_transactions
        SET status = :status, updated_at = datetime('now')
        WHERE ticket_id = :ticket_id AND tenant_id = :tenant_id AND tx_type = :tx_type
        "#,
        named_params! {
            ":ticket_id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":tx_type": tx_type.to_string(),
            ":status": status.to_string(),
        },
    )?;
    Ok(())
}

/// Records the submitted signature and moves the row to PROCESSING.
pub fn set_transaction_signature(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    tx_type: TxType,
    signature: &str,
) -> CoreDbResult<()> {
    conn.execute(
        r#"
        UPDATE chain_transactions
        SET signature = :signature, status = :status, updated_at = datetime('now')
        WHERE ticket_id = :ticket_id AND tenant_id = :tenant_id AND tx_type = :tx_type
        "#,
        named_params! {
            ":ticket_id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":tx_type": tx_type.to_string(),
            ":signature": signature,
            ":status": TxStatus::Processing.to_string(),
        },
    )?;
    Ok(())
}

pub fn mark_transaction_confirmed(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    tx_type: TxType,
    signature: &str,
    mint_address: &str,
    slot_number: i64,
) -> CoreDbResult<()> {
    info!(
        target: "audit",
        ticket_id = ticket_id,
        signature = signature,
        slot = slot_number;
        "DB: Chain transaction confirmed"
    );

    conn.execute(
        r#"
        UPDATE chain_transactions
        SET status = :status,
            signature = :signature,
            mint_address = :mint_address,
            slot_number = :slot,
            last_error = NULL,
            updated_at = datetime('now')
        WHERE ticket_id = :ticket_id AND tenant_id = :tenant_id AND tx_type = :tx_type
        "#,
        named_params! {
            ":ticket_id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":tx_type": tx_type.to_string(),
            ":status": TxStatus::Confirmed.to_string(),
            ":signature": signature,
            ":mint_address": mint_address,
            ":slot": slot_number,
        },
    )?;
    Ok(())
}

pub fn mark_transaction_failed(
    conn: &Connection,
    tenant: &TenantId,
    ticket_id: &str,
    tx_type: TxType,
    error: &str,
) -> CoreDbResult<()> {
    conn.execute(
        r#"
        UPDATE chain_transactions
        SET status = :status, last_error = :error, updated_at = datetime('now')
        WHERE ticket_id = :ticket_id AND tenant_id = :tenant_id AND tx_type = :tx_type
        "#,
        named_params! {
            ":ticket_id": ticket_id,
            ":tenant_id": tenant.as_str(),
            ":tx_type": tx_type.to_string(),
            ":status": TxStatus::Failed.to_string(),
            ":error": error,
        },
    )?;
    Ok(())
}

/// Number of CONFIRMED mint rows for one ticket. The invariant the whole
/// pipeline defends is that this never exceeds one.
pub fn count_confirmed_mints(conn: &Connection, tenant: &TenantId, ticket_id: &str) -> CoreDbResult<i64> {
    let count = conn.query_row(
        r#"
        SELECT COUNT(*) FROM chain_transactions
        WHERE ticket_id = :ticket_id AND tenant_id = :tenant_id
          AND tx_type = 'MINT' AND status = 'CONFIRMED'
        "#,
        named_params! { ":ticket_id": ticket_id, ":tenant_id": tenant.as_str() },
        |row| row.get(0),
    )?;
    Ok(count)
}
