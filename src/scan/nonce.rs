use std::sync::Arc;
use std::time::Duration;

use crate::infra::{KvError, KvStore};

/// Extra lifetime beyond the rotation window so a nonce cannot be replayed
/// right as its QR expires.
const NONCE_TTL_SLACK: Duration = Duration::from_secs(30);

/// Replay guard for QR nonces, backed by the shared KV's set-if-absent.
///
/// Only the first concurrent claimant of a nonce proceeds; everyone else sees
/// a replay. Entries expire on their own, so the set stays bounded by scan
/// throughput times the rotation window.
#[derive(Clone)]
pub struct NonceRegistry {
    kv: Arc<dyn KvStore>,
}

impl NonceRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Returns `true` when this caller claimed the nonce, `false` on replay.
    pub fn claim(&self, ticket_id: &str, nonce: &str, rotation_window: Duration) -> Result<bool, KvError> {
        let key = format!("nonce:{}:{}", ticket_id, nonce);
        self.kv.set_if_absent(&key, "1", rotation_window + NONCE_TTL_SLACK)
    }
}
