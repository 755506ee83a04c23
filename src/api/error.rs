//! API error types and Problem-Details HTTP conversion.
//!
//! All errors serialize as a Problem Details body
//! `{type, title, status, detail, code, instance, timestamp}` plus
//! category-specific fields such as `retryAfter` or `recoveryPoint`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use log::{error, warn};
use serde_json::{Value, json};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::infra::BulkheadFull;
use crate::mint::MintError;
use crate::models::RecoveryPoint;
use crate::scan::ManifestError;

#[derive(Debug, Error, ToSchema)]
pub enum ApiError {
    /// The request body or headers failed validation. Returns 400.
    #[error("Invalid request: {0}")]
    InvalidPayload(String),

    /// Missing or unusable auth context. Returns 401.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The addressed resource does not exist within the caller's tenant
    /// scope. Cross-tenant probes deliberately land here too. Returns 404.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another request with the same idempotency key is mid-flight.
    /// Returns 409 with the recovery point as a hint.
    #[error("Request already in progress")]
    MintInProgress { recovery_point: RecoveryPoint },

    /// The workload class is at capacity. Returns 503 with `Retry-After`
    /// and the `X-Bulkhead-*` headers.
    #[error("Service at capacity")]
    BulkheadExhausted {
        category: String,
        capacity: usize,
        in_flight: usize,
        retry_after_secs: u64,
    },

    /// A dependency this request needs is down or timing out. Returns 502.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Anything unexpected. Returns 500 with no internals leaked.
    #[error("Internal server error")]
    Internal(String),
}

impl From<BulkheadFull> for ApiError {
    fn from(full: BulkheadFull) -> Self {
        ApiError::BulkheadExhausted {
            category: full.category.to_string(),
            capacity: full.capacity,
            in_flight: full.in_flight,
            retry_after_secs: full.retry_after_secs,
        }
    }
}

impl From<MintError> for ApiError {
    fn from(err: MintError) -> Self {
        match err {
            MintError::TicketNotFound => ApiError::NotFound("Ticket not found".to_string()),
            MintError::Validation(detail) => ApiError::InvalidPayload(detail),
            MintError::Lock(e) => ApiError::Upstream(format!("mint serialization: {}", e)),
            MintError::Treasury(e) => ApiError::Unauthorized(e.to_string()),
            MintError::Chain(e) => ApiError::Upstream(format!("chain: {}", e)),
            MintError::Vault(e) => ApiError::Upstream(format!("vault: {}", e)),
            MintError::Metadata(e) => ApiError::Upstream(format!("metadata storage: {}", e)),
            MintError::Db(e) => ApiError::Internal(e.to_string()),
            MintError::Kv(e) => ApiError::Internal(e.to_string()),
            MintError::Internal(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<ManifestError> for ApiError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::DeviceNotEligible(device) => {
                ApiError::Unauthorized(format!("Device '{}' cannot produce offline manifests", device))
            },
            ManifestError::EventNotFound(event) => ApiError::NotFound(format!("Event '{}' not found", event)),
            ManifestError::Db(e) => ApiError::Internal(e.to_string()),
            ManifestError::Task(e) => ApiError::Internal(e),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MintInProgress { .. } => StatusCode::CONFLICT,
            ApiError::BulkheadExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "validation",
            ApiError::Unauthorized(_) => "auth",
            ApiError::NotFound(_) => "not_found",
            ApiError::MintInProgress { .. } => "conflict",
            ApiError::BulkheadExhausted { .. } => "rate_limited",
            ApiError::Upstream(_) => "upstream_unavailable",
            ApiError::Internal(_) => "internal",
        }
    }

    fn extras(&self) -> Value {
        match self {
            ApiError::MintInProgress { recovery_point } => json!({
                "recoveryPoint": recovery_point,
            }),
            ApiError::BulkheadExhausted {
                category,
                capacity,
                in_flight,
                retry_after_secs,
            } => json!({
                "bulkheadType": category,
                "capacity": capacity,
                "inFlight": in_flight,
                "retryAfter": retry_after_secs,
            }),
            _ => json!({}),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let instance = Uuid::new_v4().to_string();

        match &self {
            ApiError::Internal(detail) => {
                error!(instance = &*instance, detail = detail.as_str(); "API: internal error");
            },
            ApiError::Upstream(detail) => {
                warn!(instance = &*instance, detail = detail.as_str(); "API: upstream failure");
            },
            _ => {},
        }

        // Internal details never reach the client.
        let detail = match &self {
            ApiError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        let mut body = json!({
            "type": format!("https://docs.turnstile.dev/errors/{}", self.code()),
            "title": status.canonical_reason().unwrap_or("Error"),
            "status": status.as_u16(),
            "detail": detail,
            "code": self.code(),
            "instance": instance,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let (Value::Object(map), Value::Object(extras)) = (&mut body, self.extras()) {
            map.extend(extras);
        }

        let mut response = (status, Json(body)).into_response();

        if let ApiError::BulkheadExhausted {
            category,
            capacity,
            in_flight,
            retry_after_secs,
        } = &self
        {
            let headers = response.headers_mut();
            headers.insert("Retry-After", header_value(retry_after_secs.to_string()));
            headers.insert("X-Bulkhead-Type", header_value(category.clone()));
            headers.insert("X-Bulkhead-Capacity", header_value(capacity.to_string()));
            headers.insert("X-Bulkhead-In-Flight", header_value(in_flight.to_string()));
        }

        response
    }
}

fn header_value(value: String) -> HeaderValue {
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}
