use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::TenantId;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Metadata upload failed: {0}")]
    Upload(String),
}

/// External metadata storage for token content. Production wiring posts to
/// the platform's storage service; tests use [`InMemoryMetadataStore`].
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Uploads the ticket's token metadata and returns its URI.
    async fn upload_ticket_metadata(&self, tenant: &TenantId, ticket_id: &str) -> Result<String, MetadataError>;
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    uploads: Mutex<Vec<String>>,
    fail_next: AtomicU32,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn upload_ticket_metadata(&self, _tenant: &TenantId, ticket_id: &str) -> Result<String, MetadataError> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MetadataError::Upload("storage timeout".to_string()));
        }

        let uri = format!("meta://{}/{}", ticket_id, Uuid::new_v4());
        self.uploads.lock().unwrap().push(uri.clone());
        Ok(uri)
    }
}
