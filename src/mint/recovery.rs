use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::infra::{KvError, KvStore};
use crate::models::{RecoveryPoint, TenantId};

/// Recovery state lingers for a day after completion, then the TTL reaps it.
pub const RECOVERY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Step artifacts a resumed job needs: where metadata landed, which
/// signature was (or was about to be) submitted, and the mint address chosen
/// for the token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryMetadata {
    pub metadata_uri: Option<String>,
    pub signature: Option<String>,
    pub mint_address: Option<String>,
    pub error: Option<String>,
}

/// Durable checkpoint record for one mint job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryState {
    pub job_id: String,
    pub ticket_id: String,
    pub tenant_id: TenantId,
    pub current_point: RecoveryPoint,
    pub previous_point: Option<RecoveryPoint>,
    pub retry_count: u32,
    pub started_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub metadata: RecoveryMetadata,
}

impl RecoveryState {
    pub fn new(job_id: &str, ticket_id: &str, tenant_id: &TenantId) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            job_id: job_id.to_string(),
            ticket_id: ticket_id.to_string(),
            tenant_id: tenant_id.clone(),
            current_point: RecoveryPoint::Initiated,
            previous_point: None,
            retry_count: 0,
            started_at: now,
            updated_at: now,
            metadata: RecoveryMetadata::default(),
        }
    }

    /// Moves the job to `point`, remembering where it came from.
    pub fn advance(&mut self, point: RecoveryPoint) {
        self.previous_point = Some(self.current_point);
        self.current_point = point;
        self.updated_at = Utc::now().naive_utc();
    }
}

/// Checkpoint store over the shared KV, written on every state transition.
pub struct RecoveryStore {
    kv: Arc<dyn KvStore>,
}

impl RecoveryStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(job_id: &str) -> String {
        format!("recovery:{}", job_id)
    }

    pub fn save(&self, state: &RecoveryState) -> Result<(), KvError> {
        debug!(
            job_id = &*state.job_id,
            point:% = state.current_point;
            "Recovery checkpoint"
        );
        let raw = serde_json::to_string(state).map_err(|e| KvError::Operation(e.to_string()))?;
        self.kv.set(&Self::key(&state.job_id), &raw, Some(RECOVERY_TTL))
    }

    pub fn load(&self, job_id: &str) -> Result<Option<RecoveryState>, KvError> {
        let Some(raw) = self.kv.get(&Self::key(job_id))? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| KvError::Operation(format!("corrupt recovery state: {}", e)))
    }

    pub fn delete(&self, job_id: &str) -> Result<(), KvError> {
        self.kv.delete(&Self::key(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::InMemoryKv;

    #[test]
    fn test_checkpoint_roundtrip() {
        let store = RecoveryStore::new(Arc::new(InMemoryKv::new()));
        let tenant = TenantId::new("t-1");

        let mut state = RecoveryState::new("job-1", "tk-1", &tenant);
        store.save(&state).unwrap();

        state.advance(RecoveryPoint::Validated);
        state.metadata.metadata_uri = Some("meta://tk-1/1".to_string());
        store.save(&state).unwrap();

        let loaded = store.load("job-1").unwrap().unwrap();
        assert_eq!(loaded.current_point, RecoveryPoint::Validated);
        assert_eq!(loaded.previous_point, Some(RecoveryPoint::Initiated));
        assert_eq!(loaded.metadata.metadata_uri.as_deref(), Some("meta://tk-1/1"));

        store.delete("job-1").unwrap();
        assert!(store.load("job-1").unwrap().is_none());
    }

    #[test]
    fn test_missing_state_is_none() {
        let store = RecoveryStore::new(Arc::new(InMemoryKv::new()));
        assert!(store.load("job-nope").unwrap().is_none());
    }
}
