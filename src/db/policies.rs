use log::warn;
use rusqlite::{Connection, OptionalExtension, named_params};
use serde::{Deserialize, Serialize};

use crate::db::{CoreDbError, CoreDbResult};
use crate::models::TenantId;

pub const DEFAULT_DUPLICATE_WINDOW_MINUTES: i64 = 10;
const WINDOW_MIN: i64 = 1;
const WINDOW_MAX: i64 = 1440;

/// How long after an admitted entry a second scan counts as a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicatePolicy {
    pub window_minutes: i64,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            window_minutes: DEFAULT_DUPLICATE_WINDOW_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReentryPolicy {
    pub enabled: bool,
    pub max_reentries: i64,
    pub cooldown_minutes: i64,
}

/// Writes or replaces a policy row. `event_id = None` is the tenant-global
/// fallback consulted when no event-scoped row exists.
pub fn upsert_policy(
    conn: &Connection,
    tenant: &TenantId,
    kind: &str,
    event_id: Option<&str>,
    config: &serde_json::Value,
) -> CoreDbResult<()> {
    conn.execute(
        r#"
        INSERT INTO scan_policies (tenant_id, kind, event_id, config)
        VALUES (:tenant_id, :kind, :event_id, :config)
        ON CONFLICT (tenant_id, kind, event_id)
        DO UPDATE SET config = :config
        "#,
        named_params! {
            ":tenant_id": tenant.as_str(),
            ":kind": kind,
            ":event_id": event_id,
            ":config": config.to_string(),
        },
    )?;
    Ok(())
}

fn get_policy_config(
    conn: &Connection,
    tenant: &TenantId,
    kind: &str,
    event_id: &str,
) -> CoreDbResult<Option<String>> {
    // Event-scoped row wins over the tenant-global one.
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT config FROM scan_policies
        WHERE tenant_id = :tenant_id
          AND kind = :kind
          AND (event_id = :event_id OR event_id IS NULL)
        ORDER BY event_id IS NULL
        LIMIT 1
        "#,
    )?;

    let config = stmt
        .query_row(
            named_params! {
                ":tenant_id": tenant.as_str(),
                ":kind": kind,
                ":event_id": event_id,
            },
            |row| row.get(0),
        )
        .optional()?;

    Ok(config)
}

/// Resolves the duplicate window for an event, clamping out-of-range or
/// malformed configuration back to the default rather than letting a bad row
/// widen the window to anything.
pub fn get_duplicate_policy(conn: &Connection, tenant: &TenantId, event_id: &str) -> CoreDbResult<DuplicatePolicy> {
    let Some(raw) = get_policy_config(conn, tenant, "duplicate", event_id)? else {
        return Ok(DuplicatePolicy::default());
    };

    let policy: DuplicatePolicy = match serde_json::from_str(&raw) {
        Ok(p) => p,
        Err(e) => {
            warn!(event_id = event_id, error:% = e; "Malformed duplicate policy, using default");
            return Ok(DuplicatePolicy::default());
        },
    };

    if !(WINDOW_MIN..=WINDOW_MAX).contains(&policy.window_minutes) {
        warn!(
            event_id = event_id,
            window = policy.window_minutes;
            "Duplicate window out of range, using default"
        );
        return Ok(DuplicatePolicy::default());
    }

    Ok(policy)
}

pub fn get_reentry_policy(conn: &Connection, tenant: &TenantId, event_id: &str) -> CoreDbResult<Option<ReentryPolicy>> {
    let Some(raw) = get_policy_config(conn, tenant, "reentry", event_id)? else {
        return Ok(None);
    };

    let policy: ReentryPolicy =
        serde_json::from_str(&raw).map_err(|e| CoreDbError::Decoding(format!("reentry policy: {}", e)))?;

    if !(WINDOW_MIN..=WINDOW_MAX).contains(&policy.cooldown_minutes) {
        return Err(CoreDbError::InvalidInput(format!(
            "reentry cooldown_minutes out of range: {}",
            policy.cooldown_minutes
        )));
    }

    Ok(Some(policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use serde_json::json;

    #[test]
    fn test_duplicate_policy_defaults_and_override() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        // Nothing configured: default window.
        let policy = get_duplicate_policy(&conn, &tenant, "ev-1").unwrap();
        assert_eq!(policy.window_minutes, DEFAULT_DUPLICATE_WINDOW_MINUTES);

        // Global row applies to every event.
        upsert_policy(&conn, &tenant, "duplicate", None, &json!({"window_minutes": 30})).unwrap();
        assert_eq!(get_duplicate_policy(&conn, &tenant, "ev-1").unwrap().window_minutes, 30);

        // Event-scoped row shadows the global one.
        upsert_policy(&conn, &tenant, "duplicate", Some("ev-1"), &json!({"window_minutes": 5})).unwrap();
        assert_eq!(get_duplicate_policy(&conn, &tenant, "ev-1").unwrap().window_minutes, 5);
        assert_eq!(get_duplicate_policy(&conn, &tenant, "ev-2").unwrap().window_minutes, 30);
    }

    #[test]
    fn test_duplicate_window_out_of_range_falls_back() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        upsert_policy(&conn, &tenant, "duplicate", Some("ev-1"), &json!({"window_minutes": 0})).unwrap();
        assert_eq!(
            get_duplicate_policy(&conn, &tenant, "ev-1").unwrap().window_minutes,
            DEFAULT_DUPLICATE_WINDOW_MINUTES
        );

        upsert_policy(&conn, &tenant, "duplicate", Some("ev-1"), &json!({"window_minutes": 2000})).unwrap();
        assert_eq!(
            get_duplicate_policy(&conn, &tenant, "ev-1").unwrap().window_minutes,
            DEFAULT_DUPLICATE_WINDOW_MINUTES
        );
    }

    #[test]
    fn test_reentry_policy_roundtrip() {
        let (pool, _dir) = test_pool();
        let conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        assert!(get_reentry_policy(&conn, &tenant, "ev-1").unwrap().is_none());

        upsert_policy(
            &conn,
            &tenant,
            "reentry",
            Some("ev-1"),
            &json!({"enabled": true, "max_reentries": 5, "cooldown_minutes": 10}),
        )
        .unwrap();

        let policy = get_reentry_policy(&conn, &tenant, "ev-1").unwrap().unwrap();
        assert!(policy.enabled);
        assert_eq!(policy.max_reentries, 5);
        assert_eq!(policy.cooldown_minutes, 10);
    }
}
