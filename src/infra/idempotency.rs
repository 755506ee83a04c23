use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::infra::kv::{KvError, KvStore};
use crate::models::{RecoveryPoint, TenantId};

pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

/// One idempotency record, stored as JSON under `idem:<tenant>:<key>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    pub status: IdempotencyStatus,
    pub request_id: String,
    pub recovery_point: RecoveryPoint,
    pub response: Option<serde_json::Value>,
}

/// Outcome of registering a key before doing the work.
#[derive(Debug)]
pub enum BeginOutcome {
    /// No prior entry (or a failed one was cleared); the caller owns the work.
    Started,
    /// A completed entry exists; serve its cached response.
    Replayed(IdempotencyEntry),
    /// Another request is mid-flight with this key.
    InFlight(IdempotencyEntry),
}

/// Idempotency store over the shared KV, 24 h TTL, with lifecycle counters.
pub struct IdempotencyStore {
    kv: Arc<dyn KvStore>,
    pub started: AtomicU64,
    pub replayed: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

impl IdempotencyStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            started: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn storage_key(tenant: &TenantId, key: &str) -> String {
        format!("idem:{}:{}", tenant, key)
    }

    fn load(&self, storage_key: &str) -> Result<Option<IdempotencyEntry>, KvError> {
        let Some(raw) = self.kv.get(storage_key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| KvError::Operation(format!("corrupt idempotency entry: {}", e)))
    }

    fn store(&self, storage_key: &str, entry: &IdempotencyEntry) -> Result<(), KvError> {
        let raw = serde_json::to_string(entry).map_err(|e| KvError::Operation(e.to_string()))?;
        self.kv.set(storage_key, &raw, Some(IDEMPOTENCY_TTL))
    }

    /// Registers `key` for this request. A completed prior entry is replayed,
    /// an in-flight one is surfaced as a conflict, and a failed one is
    /// cleared so the caller can try again.
    pub fn begin(&self, tenant: &TenantId, key: &str, request_id: &str) -> Result<BeginOutcome, KvError> {
        let storage_key = Self::storage_key(tenant, key);

        if let Some(entry) = self.load(&storage_key)? {
            match entry.status {
                IdempotencyStatus::Completed => {
                    debug!(key = key; "Idempotency hit, replaying cached response");
                    self.replayed.fetch_add(1, Ordering::Relaxed);
                    return Ok(BeginOutcome::Replayed(entry));
                },
                IdempotencyStatus::Processing => {
                    return Ok(BeginOutcome::InFlight(entry));
                },
                IdempotencyStatus::Failed => {
                    // A failed attempt does not poison the key.
                    self.kv.delete(&storage_key)?;
                },
            }
        }

        let entry = IdempotencyEntry {
            status: IdempotencyStatus::Processing,
            request_id: request_id.to_string(),
            recovery_point: RecoveryPoint::Initiated,
            response: None,
        };
        self.store(&storage_key, &entry)?;
        self.started.fetch_add(1, Ordering::Relaxed);
        Ok(BeginOutcome::Started)
    }

    /// Updates the recovery point visible to concurrent 409 responses.
    pub fn checkpoint(&self, tenant: &TenantId, key: &str, point: RecoveryPoint) -> Result<(), KvError> {
        let storage_key = Self::storage_key(tenant, key);
        if let Some(mut entry) = self.load(&storage_key)? {
            entry.recovery_point = point;
            self.store(&storage_key, &entry)?;
        }
        Ok(())
    }

    /// Caches the final response against the key.
    pub fn complete(
        &self,
        tenant: &TenantId,
        key: &str,
        response: serde_json::Value,
    ) -> Result<(), KvError> {
        let storage_key = Self::storage_key(tenant, key);
        if let Some(mut entry) = self.load(&storage_key)? {
            entry.status = IdempotencyStatus::Completed;
            entry.recovery_point = RecoveryPoint::Completed;
            entry.response = Some(response);
            self.store(&storage_key, &entry)?;
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn fail(&self, tenant: &TenantId, key: &str) -> Result<(), KvError> {
        let storage_key = Self::storage_key(tenant, key);
        if let Some(mut entry) = self.load(&storage_key)? {
            entry.status = IdempotencyStatus::Failed;
            self.store(&storage_key, &entry)?;
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Idempotency keys ride in from clients; only sane lengths are accepted.
pub fn validate_idempotency_key(key: &str) -> bool {
    (16..=128).contains(&key.len()) && key.chars().all(|c| c.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::kv::InMemoryKv;
    use serde_json::json;

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(Arc::new(InMemoryKv::new()))
    }

    const KEY: &str = "mint-req-0123456789abcdef";

    #[test]
    fn test_begin_complete_replay() {
        let store = store();
        let tenant = TenantId::new("t-1");

        assert!(matches!(store.begin(&tenant, KEY, "req-1").unwrap(), BeginOutcome::Started));

        let response = json!({"job_id": "job-1", "status": "COMPLETED"});
        store.complete(&tenant, KEY, response.clone()).unwrap();

        match store.begin(&tenant, KEY, "req-2").unwrap() {
            BeginOutcome::Replayed(entry) => {
                assert_eq!(entry.response, Some(response));
                assert_eq!(entry.request_id, "req-1");
                assert_eq!(entry.recovery_point, RecoveryPoint::Completed);
            },
            other => panic!("expected replay, got {:?}", other),
        }
        assert_eq!(store.replayed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_in_flight_conflict() {
        let store = store();
        let tenant = TenantId::new("t-1");

        store.begin(&tenant, KEY, "req-1").unwrap();
        store.checkpoint(&tenant, KEY, RecoveryPoint::TxBuilt).unwrap();

        match store.begin(&tenant, KEY, "req-2").unwrap() {
            BeginOutcome::InFlight(entry) => {
                assert_eq!(entry.recovery_point, RecoveryPoint::TxBuilt);
            },
            other => panic!("expected in-flight, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_entry_is_cleared() {
        let store = store();
        let tenant = TenantId::new("t-1");

        store.begin(&tenant, KEY, "req-1").unwrap();
        store.fail(&tenant, KEY).unwrap();

        assert!(matches!(store.begin(&tenant, KEY, "req-2").unwrap(), BeginOutcome::Started));
    }

    #[test]
    fn test_tenant_keys_do_not_collide() {
        let store = store();
        let a = TenantId::new("t-1");
        let b = TenantId::new("t-2");

        store.begin(&a, KEY, "req-1").unwrap();
        // The same key under another tenant starts fresh.
        assert!(matches!(store.begin(&b, KEY, "req-2").unwrap(), BeginOutcome::Started));
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_idempotency_key("0123456789abcdef"));
        assert!(!validate_idempotency_key("short"));
        assert!(!validate_idempotency_key(&"x".repeat(129)));
        assert!(!validate_idempotency_key("0123456789abcde\u{7}"));
    }
}
