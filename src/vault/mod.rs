//! Custodial key vault: lazy per-user keypairs under envelope encryption.
//!
//! Private keys are generated locally, encrypted with a per-wallet data key
//! (AES-256-GCM, fresh 12-byte IV), and the data key itself is wrapped by the
//! external KMS. Plaintext key material only ever lives in zeroized scratch
//! buffers, and every signing use is recorded with a caller-supplied reason.

pub mod kms;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use log::{error, info};
use rand::RngCore;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::db::{self, SqlitePool};
use crate::models::{CustodialWallet, TenantId, WalletStatus};

pub use kms::{DataKey, InMemoryKms, KmsClient, KmsError};

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Wallet not found for user '{0}'")]
    WalletNotFound(String),

    #[error("Wallet '{0}' is {1}, signing refused")]
    WalletNotActive(String, WalletStatus),

    #[error("Key integrity check failed: derived public key does not match stored address")]
    KeyIntegrity,

    #[error("KMS error: {0}")]
    Kms(#[from] KmsError),

    #[error("Database error: {0}")]
    Db(#[from] db::CoreDbError),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Task error: {0}")]
    Task(String),
}

/// Envelope-encrypting vault over the wallet tables and the KMS adapter.
pub struct CustodialVault {
    db_pool: SqlitePool,
    kms: Arc<dyn KmsClient>,
    kms_key_id: String,
}

impl CustodialVault {
    pub fn new(db_pool: SqlitePool, kms: Arc<dyn KmsClient>, kms_key_id: impl Into<String>) -> Self {
        Self {
            db_pool,
            kms,
            kms_key_id: kms_key_id.into(),
        }
    }

    /// Returns the user's wallet, creating one on first use.
    pub async fn get_or_create_wallet(&self, tenant: &TenantId, user_id: &str) -> Result<CustodialWallet, VaultError> {
        if let Some(wallet) = self.load_wallet(tenant, user_id).await? {
            return Ok(wallet);
        }
        self.create_wallet(tenant, user_id).await
    }

    async fn load_wallet(&self, tenant: &TenantId, user_id: &str) -> Result<Option<CustodialWallet>, VaultError> {
        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let user_id = user_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            db::get_wallet_by_user(&conn, &tenant, &user_id)
        })
        .await
        .map_err(|e| VaultError::Task(e.to_string()))?
        .map_err(Into::into)
    }

    async fn create_wallet(&self, tenant: &TenantId, user_id: &str) -> Result<CustodialWallet, VaultError> {
        // Keypair first, entirely locally.
        let mut secret_bytes = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut *secret_bytes);
        let signing_key = SigningKey::from_bytes(&secret_bytes);
        let address = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();

        // Envelope: a fresh data key from the KMS wraps the secret.
        let data_key = self.kms.generate_data_key(&self.kms_key_id).await?;

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&data_key.plaintext));
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), secret_bytes.as_slice())
            .map_err(|_| VaultError::Crypto("secret encryption failed".to_string()))?;

        // The AEAD appends the tag; the schema stores it separately.
        let auth_tag = sealed.split_off(sealed.len() - TAG_LEN);
        let encrypted_secret = sealed;

        let wallet_id = Uuid::new_v4().to_string();
        {
            let pool = self.db_pool.clone();
            let tenant = tenant.clone();
            let wallet_id = wallet_id.clone();
            let user_id = user_id.to_string();
            let address = address.clone();
            let kms_key_id = self.kms_key_id.clone();
            let encrypted_data_key = data_key.ciphertext.clone();
            let iv = iv.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut conn = pool.get()?;
                db::create_wallet_with_key(
                    &mut conn,
                    &tenant,
                    &wallet_id,
                    &user_id,
                    &address,
                    &kms_key_id,
                    &encrypted_secret,
                    &encrypted_data_key,
                    &iv,
                    &auth_tag,
                )
            })
            .await
            .map_err(|e| VaultError::Task(e.to_string()))??;
        }

        info!(
            target: "audit",
            user_id = user_id,
            address = &*crate::log::mask_string(&address);
            "Custodial wallet created"
        );

        Ok(CustodialWallet {
            id: wallet_id,
            user_id: user_id.to_string(),
            tenant_id: tenant.clone(),
            address,
            status: WalletStatus::Active,
            kms_key_id: self.kms_key_id.clone(),
            key_version: 1,
        })
    }

    /// Signs `message` with the user's custodial key.
    ///
    /// The secret exists in plaintext only inside this call and is zeroed on
    /// every exit path. The derived public key must match the stored address;
    /// a mismatch means the stored envelope is corrupt and is fatal.
    pub async fn sign(
        &self,
        tenant: &TenantId,
        user_id: &str,
        message: &[u8],
        reason: &str,
    ) -> Result<String, VaultError> {
        let wallet = self
            .load_wallet(tenant, user_id)
            .await?
            .ok_or_else(|| VaultError::WalletNotFound(user_id.to_string()))?;

        if wallet.status != WalletStatus::Active {
            return Err(VaultError::WalletNotActive(wallet.id.clone(), wallet.status));
        }

        let key_row = {
            let pool = self.db_pool.clone();
            let wallet_id = wallet.id.clone();
            tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                db::get_wallet_key(&conn, &wallet_id)
            })
            .await
            .map_err(|e| VaultError::Task(e.to_string()))??
            .ok_or_else(|| VaultError::WalletNotFound(user_id.to_string()))?
        };

        let data_key = self
            .kms
            .decrypt_data_key(&wallet.kms_key_id, &key_row.encrypted_data_key)
            .await?;

        // Reassemble ciphertext||tag for the AEAD open.
        let mut sealed = key_row.encrypted_secret.clone();
        sealed.extend_from_slice(&key_row.auth_tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&data_key));
        let secret = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&key_row.iv), sealed.as_slice())
                .map_err(|_| VaultError::Crypto("secret decryption failed".to_string()))?,
        );

        let secret_array: &[u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::Crypto("stored secret has wrong length".to_string()))?;
        let signing_key = SigningKey::from_bytes(secret_array);

        // Integrity: the key we decrypted must be the key this wallet claims.
        let derived: VerifyingKey = signing_key.verifying_key();
        let stored = bs58::decode(&wallet.address)
            .into_vec()
            .map_err(|_| VaultError::KeyIntegrity)?;
        if derived.to_bytes().as_slice() != stored.as_slice() {
            error!(
                target: "audit",
                wallet_id = &*wallet.id;
                "FATAL: custodial key material does not match wallet address"
            );
            return Err(VaultError::KeyIntegrity);
        }

        let signature = signing_key.sign(message);

        {
            let pool = self.db_pool.clone();
            let wallet_id = wallet.id.clone();
            let reason = reason.to_string();
            tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                db::record_key_access(&conn, &wallet_id, &reason)
            })
            .await
            .map_err(|e| VaultError::Task(e.to_string()))??;
        }

        Ok(bs58::encode(signature.to_bytes()).into_string())
    }

    pub async fn set_status(&self, tenant: &TenantId, wallet_id: &str, status: WalletStatus) -> Result<(), VaultError> {
        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let wallet_id = wallet_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            db::update_wallet_status(&conn, &tenant, &wallet_id, status)
        })
        .await
        .map_err(|e| VaultError::Task(e.to_string()))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use ed25519_dalek::Verifier;

    fn vault(pool: &SqlitePool) -> CustodialVault {
        CustodialVault::new(pool.clone(), Arc::new(InMemoryKms::new()), "kms-key-1")
    }

    #[tokio::test]
    async fn test_lazy_creation_is_idempotent() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        let vault = vault(&pool);

        let first = vault.get_or_create_wallet(&tenant, "user-1").await.unwrap();
        let second = vault.get_or_create_wallet(&tenant, "user-1").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.address, second.address);
        assert_eq!(first.key_version, 1);
    }

    #[tokio::test]
    async fn test_sign_verifies_against_address() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        let vault = vault(&pool);

        let wallet = vault.get_or_create_wallet(&tenant, "user-1").await.unwrap();
        let message = b"mint ticket tk-1";
        let signature_b58 = vault.sign(&tenant, "user-1", message, "mint tk-1").await.unwrap();

        // The signature must verify under the advertised address.
        let pubkey_bytes: [u8; 32] = bs58::decode(&wallet.address).into_vec().unwrap().try_into().unwrap();
        let verifying_key = VerifyingKey::from_bytes(&pubkey_bytes).unwrap();
        let sig_bytes: [u8; 64] = bs58::decode(&signature_b58).into_vec().unwrap().try_into().unwrap();
        verifying_key
            .verify(message, &ed25519_dalek::Signature::from_bytes(&sig_bytes))
            .expect("signature must verify");

        // The access trail advanced.
        let conn = pool.get().unwrap();
        let key = db::get_wallet_key(&conn, &wallet.id).unwrap().unwrap();
        assert_eq!(key.access_count, 1);
        assert_eq!(key.last_access_reason.as_deref(), Some("mint tk-1"));
    }

    #[tokio::test]
    async fn test_inactive_wallet_refuses_to_sign() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        let vault = vault(&pool);

        let wallet = vault.get_or_create_wallet(&tenant, "user-1").await.unwrap();
        vault.set_status(&tenant, &wallet.id, WalletStatus::Suspended).await.unwrap();

        let err = vault.sign(&tenant, "user-1", b"msg", "test").await.unwrap_err();
        assert!(matches!(err, VaultError::WalletNotActive(_, WalletStatus::Suspended)));
    }

    #[tokio::test]
    async fn test_corrupt_envelope_is_fatal_integrity_error() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        let vault = vault(&pool);

        let wallet = vault.get_or_create_wallet(&tenant, "user-1").await.unwrap();

        // Swap the stored address for a different key's address.
        let mut other_secret = [7u8; 32];
        rand::thread_rng().fill_bytes(&mut other_secret);
        let other = SigningKey::from_bytes(&other_secret);
        let other_address = bs58::encode(other.verifying_key().to_bytes()).into_string();
        {
            let conn = pool.get().unwrap();
            conn.execute(
                "UPDATE custodial_wallets SET address = ?1 WHERE id = ?2",
                rusqlite::params![other_address, wallet.id],
            )
            .unwrap();
        }

        let err = vault.sign(&tenant, "user-1", b"msg", "test").await.unwrap_err();
        assert!(matches!(err, VaultError::KeyIntegrity));
    }

    #[tokio::test]
    async fn test_wallets_are_tenant_scoped() {
        let (pool, _dir) = test_pool();
        let vault = vault(&pool);

        let a = vault.get_or_create_wallet(&TenantId::new("t-1"), "user-1").await.unwrap();
        let b = vault.get_or_create_wallet(&TenantId::new("t-2"), "user-1").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.address, b.address);
    }
}
