use std::str::FromStr;

use chrono::NaiveDateTime;
use log::info;
use rusqlite::{Connection, OptionalExtension, named_params};

use crate::db::CoreDbResult;
use crate::models::{Device, TenantId, Zone};

/// Fetches a device by id without a tenant filter.
///
/// The device row is the tenant anchor of a scan request: its `tenant_id`
/// scopes every query the decider makes afterwards.
pub fn get_device(conn: &Connection, device_id: &str) -> CoreDbResult<Option<Device>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT
            device_id,
            tenant_id,
            venue_id,
            zone,
            is_active,
            can_scan_offline,
            REPLACE(last_sync_at, ' ', 'T') as last_sync_at,
            REPLACE(revoked_at, ' ', 'T') as revoked_at
        FROM devices
        WHERE device_id = :device_id
        "#,
    )?;

    let row = stmt
        .query_row(named_params! { ":device_id": device_id }, |row| {
            let zone_str: String = row.get(3)?;
            Ok(Device {
                device_id: row.get(0)?,
                tenant_id: TenantId::new(row.get::<_, String>(1)?),
                venue_id: row.get(2)?,
                zone: Zone::from_str(&zone_str).unwrap_or(Zone::Ga),
                is_active: row.get(4)?,
                can_scan_offline: row.get(5)?,
                last_sync_at: row.get(6)?,
                revoked_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

pub fn insert_device(
    conn: &Connection,
    tenant: &TenantId,
    device_id: &str,
    venue_id: &str,
    zone: Zone,
    can_scan_offline: bool,
) -> CoreDbResult<()> {
    conn.execute(
        r#"
        INSERT INTO devices (device_id, tenant_id, venue_id, zone, is_active, can_scan_offline)
        VALUES (:device_id, :tenant_id, :venue_id, :zone, 1, :offline)
        "#,
        named_params! {
            ":device_id": device_id,
            ":tenant_id": tenant.as_str(),
            ":venue_id": venue_id,
            ":zone": zone.to_string(),
            ":offline": can_scan_offline,
        },
    )?;
    Ok(())
}

/// Soft revocation. A revoked device id stays revoked; there is no
/// reactivation path.
pub fn revoke_device(conn: &Connection, tenant: &TenantId, device_id: &str) -> CoreDbResult<()> {
    info!(target: "audit", device_id = device_id; "DB: Revoking device");

    conn.execute(
        r#"
        UPDATE devices
        SET is_active = 0, revoked_at = datetime('now')
        WHERE device_id = :device_id AND tenant_id = :tenant_id AND revoked_at IS NULL
        "#,
        named_params! { ":device_id": device_id, ":tenant_id": tenant.as_str() },
    )?;
    Ok(())
}

pub fn touch_device_sync(
    conn: &Connection,
    tenant: &TenantId,
    device_id: &str,
    at: NaiveDateTime,
) -> CoreDbResult<()> {
    conn.execute(
        r#"
        UPDATE devices SET last_sync_at = :at
        WHERE device_id = :device_id AND tenant_id = :tenant_id
        "#,
        named_params! {
            ":device_id": device_id,
            ":tenant_id": tenant.as_str(),
            ":at": at.to_string(),
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;

    #[test]
    fn test_device_lifecycle() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        insert_device(&conn, &tenant, "dev-1", "v-1", Zone::Backstage, true).unwrap();

        let device = get_device(&conn, "dev-1").unwrap().expect("device missing");
        assert!(device.is_active);
        assert!(device.can_scan_offline);
        assert_eq!(device.zone, Zone::Backstage);
        assert!(device.revoked_at.is_none());

        revoke_device(&conn, &tenant, "dev-1").unwrap();
        let device = get_device(&conn, "dev-1").unwrap().unwrap();
        assert!(!device.is_active);
        assert!(device.revoked_at.is_some());

        // Revocation is final; a second call must not clear the timestamp.
        let first_revoked_at = device.revoked_at;
        revoke_device(&conn, &tenant, "dev-1").unwrap();
        let device = get_device(&conn, "dev-1").unwrap().unwrap();
        assert_eq!(device.revoked_at, first_revoked_at);
    }
}
