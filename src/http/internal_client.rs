use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde_json::json;
use url::Url;

use crate::http::error::HttpError;
use crate::infra::{CircuitBreaker, CircuitBreakerConfig, InternalAuth};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Client for calls into sibling platform services, carrying the internal
/// HMAC headers on every request.
///
/// A circuit breaker suppresses calls while the peer is failing; during the
/// cool-down callers get an immediate error instead of a hanging request.
pub struct InternalServiceClient {
    base_url: Url,
    service_name: String,
    auth: Arc<InternalAuth>,
    client: reqwest_middleware::ClientWithMiddleware,
    breaker: CircuitBreaker,
}

impl InternalServiceClient {
    pub fn new(base_url: Url, service_name: impl Into<String>, auth: Arc<InternalAuth>) -> Result<Self, anyhow::Error> {
        let retry_policy =
            reqwest_retry::policies::ExponentialBackoff::builder().build_with_max_retries(DEFAULT_MAX_RETRIES);

        let inner_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        let client = reqwest_middleware::ClientBuilder::new(inner_client)
            .with(reqwest_retry::RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let breaker = CircuitBreaker::new(base_url.to_string(), CircuitBreakerConfig::default());

        Ok(Self {
            base_url,
            service_name: service_name.into(),
            auth,
            client,
            breaker,
        })
    }

    /// Reports an event's blockchain sync outcome back to the event service:
    /// `PUT /internal/events/{id}/blockchain-status`.
    pub async fn put_blockchain_status(
        &self,
        event_id: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<(), HttpError> {
        if !self.breaker.allow_request() {
            return Err(HttpError::ServerError {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "circuit open for event service".to_string(),
            });
        }

        let path = format!("internal/events/{}/blockchain-status", event_id);
        let url = self.base_url.join(&path)?;

        let body = json!({
            "status": status,
            "error": error,
        });
        let body_json = serde_json::to_string(&body)?;

        let headers = self
            .auth
            .sign(&self.service_name, &body_json)
            .map_err(|e| HttpError::SigningError(e.to_string()))?;

        let resp = self
            .client
            .put(url)
            .header("Content-Type", "application/json")
            .header("x-internal-service", &headers.service)
            .header("x-timestamp", headers.timestamp_ms.to_string())
            .header("x-internal-signature", &headers.signature)
            .body(body_json)
            .send()
            .await
            .inspect_err(|_| self.breaker.record_failure())?;

        if !resp.status().is_success() {
            let status_code = resp.status();
            if status_code.is_server_error() {
                self.breaker.record_failure();
            }
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read response body".into());
            warn!(
                event_id = event_id,
                status:% = status_code;
                "Blockchain status callback rejected"
            );
            return Err(HttpError::ServerError {
                status: status_code,
                body,
            });
        }

        self.breaker.record_success();
        info!(event_id = event_id, status = status; "Blockchain status callback delivered");
        Ok(())
    }
}
