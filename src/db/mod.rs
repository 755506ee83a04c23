//! Database layer for the scan and mint pipelines, backed by SQLite.
//!
//! One file per table, free functions over a pooled [`rusqlite::Connection`].
//! Every query against a tenant-scoped table takes a [`TenantId`] and binds it
//! as a parameter; there is no ambient tenant state anywhere in this layer.
//!
//! Tables:
//!
//! - **events** - event timing and venue, read by the scan decider
//! - **tickets** / **ticket_transfers** - admission tickets and transfer links
//! - **devices** - registered scanner devices
//! - **scan_events** - append-only scan decisions
//! - **scan_policies** - per-event / global duplicate and re-entry policies
//! - **chain_transactions** - one row per (ticket, tenant, tx type) mint/transfer/burn
//! - **custodial_wallets** / **wallet_keys** - envelope-encrypted key material
//! - **dlq_items** - dead-lettered mint jobs
//! - **anomaly_findings** - high-risk scan findings
//! - **treasury_alerts** - monitor alert history
//!
//! Migrations live in `migrations/` and are applied on [`init_db`].
//!
//! [`TenantId`]: crate::models::TenantId

use std::{env::current_dir, path::Path};

use include_dir::{Dir, include_dir};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite_migration::Migrations;

mod error;
pub use error::{CoreDbError, CoreDbResult};

mod events;
pub use events::{get_event, insert_event};

mod tickets;
pub use tickets::{
    find_transfer_successor, get_scannable_event_tickets, get_ticket, get_ticket_unscoped, insert_ticket,
    mark_ticket_minted, record_allowed_scan, record_transfer, update_ticket_status,
};

mod devices;
pub use devices::{get_device, insert_device, revoke_device, touch_device_sync};

mod scan_events;
pub use scan_events::{
    count_device_scans_since, count_ticket_scans_since, insert_scan_event, last_allowed_scan_since,
};

mod policies;
pub use policies::{DuplicatePolicy, ReentryPolicy, get_duplicate_policy, get_reentry_policy, upsert_policy};

mod chain_transactions;
pub use chain_transactions::{
    count_confirmed_mints, get_chain_transaction, mark_transaction_confirmed, mark_transaction_failed,
    set_transaction_signature, set_transaction_status, upsert_pending_transaction,
};

mod wallets;
pub use wallets::{
    create_wallet_with_key, get_wallet_by_user, get_wallet_key, record_key_access, update_wallet_status,
};

mod dlq;
pub use dlq::{
    archive_non_retryable_older_than, fetch_due_retries, get_dlq_item, insert_dlq_item, promote_to_non_retryable,
    reschedule_retry, resolve_dlq_item,
};

mod findings;
pub use findings::{get_findings_for_tenant, insert_finding};

mod treasury;
pub use treasury::{get_recent_treasury_alerts, insert_treasury_alert};

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

static MIGRATIONS_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

/// Initializes the SQLite database and runs migrations.
///
/// Resolves relative paths against the current directory, creates parent
/// directories, opens a pool of up to 8 connections with foreign keys and WAL
/// enabled, and applies every pending migration from `migrations/`.
pub fn init_db<P: AsRef<Path>>(db_path: P) -> CoreDbResult<SqlitePool> {
    let mut path = db_path.as_ref().to_path_buf();
    if path.is_relative() {
        path = current_dir()?.join(path);
    }
    let parent = path
        .parent()
        .ok_or_else(|| CoreDbError::InvalidInput("Invalid database file path".to_string()))?;
    std::fs::create_dir_all(parent)?;

    let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
    });
    let pool = r2d2::Pool::builder().max_size(8).build(manager)?;

    let migrations = Migrations::from_directory(&MIGRATIONS_DIR)?;
    let mut conn = pool.get()?;
    migrations.to_latest(&mut conn)?;

    Ok(pool)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::{AccessLevel, TenantId, TicketStatus, Zone};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    /// Opens a scratch database in a temp dir and returns both so the dir
    /// outlives the pool.
    pub fn test_pool() -> (SqlitePool, TempDir) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = init_db(dir.path().join("core_test.db")).expect("Failed to init DB");
        (pool, dir)
    }

    pub fn seed_event(conn: &rusqlite::Connection, tenant: &TenantId, event_id: &str, venue_id: &str) {
        let now = Utc::now().naive_utc();
        insert_event(
            conn,
            tenant,
            event_id,
            venue_id,
            "Test Event",
            now - Duration::hours(1),
            now + Duration::hours(5),
        )
        .expect("Failed to seed event");
    }

    #[allow(clippy::too_many_arguments)]
    pub fn seed_ticket(
        conn: &rusqlite::Connection,
        tenant: &TenantId,
        ticket_id: &str,
        event_id: &str,
        venue_id: &str,
        status: TicketStatus,
        access_level: AccessLevel,
        secret: &[u8],
    ) {
        insert_ticket(conn, tenant, ticket_id, event_id, venue_id, status, access_level, secret)
            .expect("Failed to seed ticket");
    }

    pub fn seed_device(conn: &rusqlite::Connection, tenant: &TenantId, device_id: &str, venue_id: &str, zone: Zone) {
        insert_device(conn, tenant, device_id, venue_id, zone, true).expect("Failed to seed device");
    }
}
