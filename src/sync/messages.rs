use serde::{Deserialize, Serialize};

/// Body of `event.blockchain_sync_requested`.
///
/// Unknown fields are ignored on deserialization and never echoed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub event_id: String,
    pub action: String,
    #[serde(default)]
    pub blockchain_data: BlockchainData,
    pub metadata: SyncMetadata,
    pub requested_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockchainData {
    /// Tickets the requester wants minted as part of this sync.
    #[serde(default)]
    pub ticket_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub timestamp: String,
    pub source: String,
}

pub const ACTION_CREATE_EVENT: &str = "CREATE_EVENT";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_are_ignored() {
        let raw = r#"{
            "event_id": "ev-1",
            "action": "CREATE_EVENT",
            "blockchain_data": {"ticket_ids": ["tk-1"], "surprise": true},
            "metadata": {"tenant_id": "t-1", "timestamp": "2026-08-01T00:00:00Z", "source": "event-service", "extra": 1},
            "requested_at": "2026-08-01T00:00:00Z",
            "unknown_top_level": "ignored"
        }"#;

        let request: SyncRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.event_id, "ev-1");
        assert_eq!(request.blockchain_data.ticket_ids, ["tk-1"]);
        assert_eq!(request.metadata.tenant_id, "t-1");
        assert!(request.metadata.user_id.is_none());
    }

    #[test]
    fn test_missing_blockchain_data_defaults_empty() {
        let raw = r#"{
            "event_id": "ev-1",
            "action": "CREATE_EVENT",
            "metadata": {"tenant_id": "t-1", "timestamp": "2026-08-01T00:00:00Z", "source": "event-service"},
            "requested_at": "2026-08-01T00:00:00Z"
        }"#;

        let request: SyncRequest = serde_json::from_str(raw).unwrap();
        assert!(request.blockchain_data.ticket_ids.is_empty());
    }
}
