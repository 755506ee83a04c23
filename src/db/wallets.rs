use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, named_params};

use crate::db::CoreDbResult;
use crate::models::{CustodialWallet, TenantId, WalletKey, WalletStatus};

/// Persists the wallet row and its envelope-encrypted key material in one
/// transaction so a crash cannot leave a wallet without a key.
#[allow(clippy::too_many_arguments)]
pub fn create_wallet_with_key(
    conn: &mut Connection,
    tenant: &TenantId,
    wallet_id: &str,
    user_id: &str,
    address: &str,
    kms_key_id: &str,
    encrypted_secret: &[u8],
    encrypted_data_key: &[u8],
    iv: &[u8],
    auth_tag: &[u8],
) -> CoreDbResult<()> {
    let tx = conn.transaction()?;

    tx.execute(
        r#"
        INSERT INTO custodial_wallets (id, user_id, tenant_id, address, status, kms_key_id, key_version)
        VALUES (:id, :user_id, :tenant_id, :address, :status, :kms_key_id, 1)
        "#,
        named_params! {
            ":id": wallet_id,
            ":user_id": user_id,
            ":tenant_id": tenant.as_str(),
            ":address": address,
            ":status": WalletStatus::Active.to_string(),
            ":kms_key_id": kms_key_id,
        },
    )?;

    tx.execute(
        r#"
        INSERT INTO wallet_keys (wallet_id, encrypted_secret, encrypted_data_key, iv, auth_tag)
        VALUES (:wallet_id, :secret, :data_key, :iv, :auth_tag)
        "#,
        named_params! {
            ":wallet_id": wallet_id,
            ":secret": encrypted_secret,
            ":data_key": encrypted_data_key,
            ":iv": iv,
            ":auth_tag": auth_tag,
        },
    )?;

    tx.commit()?;
    Ok(())
}

pub fn get_wallet_by_user(conn: &Connection, tenant: &TenantId, user_id: &str) -> CoreDbResult<Option<CustodialWallet>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT id, user_id, tenant_id, address, status, kms_key_id, key_version
        FROM custodial_wallets
        WHERE tenant_id = :tenant_id AND user_id = :user_id
        "#,
    )?;

    let wallet = stmt
        .query_row(
            named_params! { ":tenant_id": tenant.as_str(), ":user_id": user_id },
            |row| {
                let status_str: String = row.get(4)?;
                Ok(CustodialWallet {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    tenant_id: TenantId::new(row.get::<_, String>(2)?),
                    address: row.get(3)?,
                    status: WalletStatus::from_str(&status_str).unwrap_or(WalletStatus::Locked),
                    kms_key_id: row.get(5)?,
                    key_version: row.get(6)?,
                })
            },
        )
        .optional()?;

    Ok(wallet)
}

pub fn get_wallet_key(conn: &Connection, wallet_id: &str) -> CoreDbResult<Option<WalletKey>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT
            wallet_id,
            encrypted_secret,
            encrypted_data_key,
            iv,
            auth_tag,
            REPLACE(last_accessed_at, ' ', 'T') as last_accessed_at,
            last_access_reason,
            access_count
        FROM wallet_keys
        WHERE wallet_id = :wallet_id
        "#,
    )?;

    let key = stmt
        .query_row(named_params! { ":wallet_id": wallet_id }, |row| {
            Ok(WalletKey {
                wallet_id: row.get(0)?,
                encrypted_secret: row.get(1)?,
                encrypted_data_key: row.get(2)?,
                iv: row.get(3)?,
                auth_tag: row.get(4)?,
                last_accessed_at: row.get(5)?,
                last_access_reason: row.get(6)?,
                access_count: row.get(7)?,
            })
        })
        .optional()?;

    Ok(key)
}

/// Every signing use leaves an audit trail: counter, timestamp, and the
/// caller-supplied reason.
pub fn record_key_access(conn: &Connection, wallet_id: &str, reason: &str) -> CoreDbResult<()> {
    conn.execute(
        r#"
        UPDATE wallet_keys
        SET access_count = access_count + 1,
            last_accessed_at = datetime('now'),
            last_access_reason = :reason
        WHERE wallet_id = :wallet_id
        "#,
        named_params! { ":wallet_id": wallet_id, ":reason": reason },
    )?;
    Ok(())
}

pub fn update_wallet_status(
    conn: &Connection,
    tenant: &TenantId,
    wallet_id: &str,
    status: WalletStatus,
) -> CoreDbResult<()> {
    conn.execute(
        r#"
        UPDATE custodial_wallets
        SET status = :status
        WHERE id = :id AND tenant_id = :tenant_id
        "#,
        named_params! {
            ":id": wallet_id,
            ":tenant_id": tenant.as_str(),
            ":status": status.to_string(),
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;

    #[test]
    fn test_wallet_and_key_roundtrip() {
        let (pool, _dir) = test_pool();
        let mut conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        create_wallet_with_key(
            &mut conn,
            &tenant,
            "w-1",
            "user-1",
            "Addr111",
            "kms-key-1",
            b"encrypted-secret",
            b"encrypted-data-key",
            b"twelve-bytes",
            b"sixteen-byte-tag",
        )
        .unwrap();

        let wallet = get_wallet_by_user(&conn, &tenant, "user-1").unwrap().unwrap();
        assert_eq!(wallet.address, "Addr111");
        assert_eq!(wallet.status, WalletStatus::Active);
        assert_eq!(wallet.key_version, 1);

        let key = get_wallet_key(&conn, "w-1").unwrap().unwrap();
        assert_eq!(key.access_count, 0);
        assert!(key.last_accessed_at.is_none());

        record_key_access(&conn, "w-1", "mint ticket tk-1").unwrap();
        let key = get_wallet_key(&conn, "w-1").unwrap().unwrap();
        assert_eq!(key.access_count, 1);
        assert_eq!(key.last_access_reason.as_deref(), Some("mint ticket tk-1"));
    }

    #[test]
    fn test_wallet_status_transitions() {
        let (pool, _dir) = test_pool();
        let mut conn = pool.get().unwrap();
        let tenant = TenantId::new("t-1");

        create_wallet_with_key(
            &mut conn, &tenant, "w-1", "user-1", "Addr111", "kms-key-1",
            b"s", b"d", b"i", b"t",
        )
        .unwrap();

        update_wallet_status(&conn, &tenant, "w-1", WalletStatus::Suspended).unwrap();
        let wallet = get_wallet_by_user(&conn, &tenant, "user-1").unwrap().unwrap();
        assert_eq!(wallet.status, WalletStatus::Suspended);
        assert!(wallet.status.is_recoverable());

        update_wallet_status(&conn, &tenant, "w-1", WalletStatus::Archived).unwrap();
        let wallet = get_wallet_by_user(&conn, &tenant, "user-1").unwrap().unwrap();
        assert!(!wallet.status.is_recoverable());
    }
}
