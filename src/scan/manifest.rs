use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use utoipa::ToSchema;

use crate::db::{self, SqlitePool};
use crate::models::{AccessLevel, TenantId};

type HmacSha256 = Hmac<Sha256>;

/// Manifests are good for four hours; after that the device must re-sync.
pub const MANIFEST_VALIDITY: Duration = Duration::hours(4);

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Device '{0}' not found or not enabled for offline scanning")]
    DeviceNotEligible(String),

    #[error("Event '{0}' not found")]
    EventNotFound(String),

    #[error("Database error: {0}")]
    Db(#[from] db::CoreDbError),

    #[error("Task error: {0}")]
    Task(String),
}

/// One ticket's entry in an offline manifest.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ManifestEntry {
    pub access_level: AccessLevel,
    pub scan_count_snapshot: i64,
    pub offline_token: String,
}

/// Time-boxed, device-scoped bundle letting a scanner validate without a
/// backend round-trip.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OfflineManifest {
    pub event_id: String,
    pub device_id: String,
    #[schema(value_type = String)]
    pub generated_at: NaiveDateTime,
    #[schema(value_type = String)]
    pub expires_at: NaiveDateTime,
    pub entries: HashMap<String, ManifestEntry>,
}

/// Builds and validates offline manifests.
///
/// Tokens are HMAC-SHA256 over `ticket_id:event_id:offline` with the global
/// offline secret, so a scanner can verify them with nothing but the secret
/// bundle it synced.
pub struct ManifestBuilder {
    db_pool: SqlitePool,
    offline_secret: Vec<u8>,
}

impl ManifestBuilder {
    pub fn new(db_pool: SqlitePool, offline_secret: &[u8]) -> Self {
        Self {
            db_pool,
            offline_secret: offline_secret.to_vec(),
        }
    }

    fn compute_token(&self, ticket_id: &str, event_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.offline_secret).expect("HMAC accepts any key length");
        mac.update(format!("{}:{}:offline", ticket_id, event_id).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Generates a manifest covering every SOLD/MINTED ticket of the event.
    pub async fn generate(
        &self,
        tenant: &TenantId,
        event_id: &str,
        device_id: &str,
    ) -> Result<OfflineManifest, ManifestError> {
        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let event_id = event_id.to_string();
        let device_id = device_id.to_string();
        let secret = self.offline_secret.clone();

        tokio::task::spawn_blocking(move || {
            let builder = ManifestBuilder {
                db_pool: pool,
                offline_secret: secret,
            };
            builder.generate_blocking(&tenant, &event_id, &device_id)
        })
        .await
        .map_err(|e| ManifestError::Task(e.to_string()))?
    }

    fn generate_blocking(
        &self,
        tenant: &TenantId,
        event_id: &str,
        device_id: &str,
    ) -> Result<OfflineManifest, ManifestError> {
        let conn = self.db_pool.get().map_err(db::CoreDbError::from)?;

        let device = db::get_device(&conn, device_id)?
            .filter(|d| d.tenant_id == *tenant && d.is_active && d.can_scan_offline)
            .ok_or_else(|| ManifestError::DeviceNotEligible(device_id.to_string()))?;

        if db::get_event(&conn, tenant, event_id)?.is_none() {
            return Err(ManifestError::EventNotFound(event_id.to_string()));
        }

        let tickets = db::get_scannable_event_tickets(&conn, tenant, event_id)?;
        let generated_at = Utc::now().naive_utc();

        let entries = tickets
            .into_iter()
            .map(|t| {
                let token = self.compute_token(&t.id, event_id);
                (
                    t.id,
                    ManifestEntry {
                        access_level: t.access_level,
                        scan_count_snapshot: t.scan_count,
                        offline_token: token,
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        db::touch_device_sync(&conn, tenant, &device.device_id, generated_at)?;

        info!(
            event_id = event_id,
            device_id = device_id,
            entries = entries.len();
            "Offline manifest generated"
        );

        Ok(OfflineManifest {
            event_id: event_id.to_string(),
            device_id: device_id.to_string(),
            generated_at,
            expires_at: generated_at + MANIFEST_VALIDITY,
            entries,
        })
    }

    /// Constant-time check of a submitted offline token.
    pub fn validate_token(&self, ticket_id: &str, event_id: &str, submitted_token: &str) -> bool {
        let Ok(submitted) = hex::decode(submitted_token) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(&self.offline_secret).expect("HMAC accepts any key length");
        mac.update(format!("{}:{}:offline", ticket_id, event_id).as_bytes());
        mac.verify_slice(&submitted).is_ok()
    }

    /// Full check for a scan recorded offline and submitted on reconnect:
    /// the token must verify and the manifest it came from must still have
    /// been valid at submission time.
    pub fn validate_submission(
        &self,
        ticket_id: &str,
        event_id: &str,
        submitted_token: &str,
        manifest_generated_at: NaiveDateTime,
        submitted_at: NaiveDateTime,
    ) -> bool {
        if submitted_at > manifest_generated_at + MANIFEST_VALIDITY {
            return false;
        }
        self.validate_token(ticket_id, event_id, submitted_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_event, seed_ticket, test_pool};
    use crate::models::TicketStatus;

    const OFFLINE_SECRET: &[u8] = b"an-offline-manifest-secret-32byte";
    const TICKET_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[tokio::test]
    async fn test_generate_covers_scannable_tickets_only() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        {
            let conn = pool.get().unwrap();
            seed_event(&conn, &tenant, "ev-1", "v-1");
            db::insert_device(&conn, &tenant, "dev-1", "v-1", crate::models::Zone::Ga, true).unwrap();
            seed_ticket(&conn, &tenant, "tk-sold", "ev-1", "v-1", TicketStatus::Sold, AccessLevel::Ga, TICKET_SECRET);
            seed_ticket(&conn, &tenant, "tk-minted", "ev-1", "v-1", TicketStatus::Minted, AccessLevel::Vip, TICKET_SECRET);
            seed_ticket(&conn, &tenant, "tk-refunded", "ev-1", "v-1", TicketStatus::Refunded, AccessLevel::Ga, TICKET_SECRET);
        }

        let builder = ManifestBuilder::new(pool.clone(), OFFLINE_SECRET);
        let manifest = builder.generate(&tenant, "ev-1", "dev-1").await.unwrap();

        assert_eq!(manifest.entries.len(), 2);
        assert!(manifest.entries.contains_key("tk-sold"));
        assert!(manifest.entries.contains_key("tk-minted"));
        assert!(!manifest.entries.contains_key("tk-refunded"));
        assert_eq!(manifest.expires_at, manifest.generated_at + MANIFEST_VALIDITY);

        // Generation counts as a device sync.
        let conn = pool.get().unwrap();
        let device = db::get_device(&conn, "dev-1").unwrap().unwrap();
        assert!(device.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_device_must_be_offline_capable_and_same_tenant() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        let other = TenantId::new("t-2");
        {
            let conn = pool.get().unwrap();
            seed_event(&conn, &tenant, "ev-1", "v-1");
            db::insert_device(&conn, &tenant, "dev-online-only", "v-1", crate::models::Zone::Ga, false).unwrap();
            db::insert_device(&conn, &other, "dev-foreign", "v-1", crate::models::Zone::Ga, true).unwrap();
        }

        let builder = ManifestBuilder::new(pool.clone(), OFFLINE_SECRET);

        let err = builder.generate(&tenant, "ev-1", "dev-online-only").await.unwrap_err();
        assert!(matches!(err, ManifestError::DeviceNotEligible(_)));

        let err = builder.generate(&tenant, "ev-1", "dev-foreign").await.unwrap_err();
        assert!(matches!(err, ManifestError::DeviceNotEligible(_)));
    }

    #[test]
    fn test_token_roundtrip_and_tamper() {
        let (pool, _dir) = test_pool();
        let builder = ManifestBuilder::new(pool, OFFLINE_SECRET);

        let token = builder.compute_token("tk-1", "ev-1");
        assert!(builder.validate_token("tk-1", "ev-1", &token));

        // Any field change breaks the token.
        assert!(!builder.validate_token("tk-2", "ev-1", &token));
        assert!(!builder.validate_token("tk-1", "ev-2", &token));
        assert!(!builder.validate_token("tk-1", "ev-1", "deadbeef"));
        assert!(!builder.validate_token("tk-1", "ev-1", "not-hex!"));
    }

    #[test]
    fn test_submission_after_expiry_rejected() {
        let (pool, _dir) = test_pool();
        let builder = ManifestBuilder::new(pool, OFFLINE_SECRET);

        let token = builder.compute_token("tk-1", "ev-1");
        let generated_at = Utc::now().naive_utc() - Duration::hours(5);

        // Submitted while the manifest was still live.
        assert!(builder.validate_submission("tk-1", "ev-1", &token, generated_at, generated_at + Duration::hours(3)));

        // Submitted after the four-hour expiry.
        assert!(!builder.validate_submission("tk-1", "ev-1", &token, generated_at, generated_at + Duration::hours(5)));
    }
}
