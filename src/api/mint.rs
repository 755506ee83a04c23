use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::api::error::ApiError;
use crate::api::types::{MintRequest, MintResponse};
use crate::api::{AppState, require_tenant};
use crate::infra::{BulkheadCategory, validate_idempotency_key};
use crate::mint::{MintOutcome, MintReceipt};

/// Mints a ticket's token on chain.
#[utoipa::path(
    post,
    path = "/mint",
    request_body = MintRequest,
    params(
        ("Idempotency-Key" = String, Header, description = "Client-chosen key, 16-128 characters"),
    ),
    responses(
        (status = 202, description = "Mint completed", body = MintResponse),
        (status = 200, description = "Idempotent replay of a previous completion", body = MintResponse),
        (status = 400, description = "Invalid payload or idempotency key", body = ApiError),
        (status = 404, description = "Ticket not found", body = ApiError),
        (status = 409, description = "Mint already in progress for this key", body = ApiError),
        (status = 503, description = "Mint capacity exhausted", body = ApiError),
    ),
    tag = "mint"
)]
pub async fn api_mint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<MintRequest>,
) -> Result<Response, ApiError> {
    let _permit = state.core.bulkhead.try_acquire(BulkheadCategory::Mint)?;
    let tenant = require_tenant(&headers)?;

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("Idempotency-Key header is required".to_string()))?;
    if !validate_idempotency_key(idempotency_key) {
        return Err(ApiError::InvalidPayload(
            "Idempotency-Key must be 16-128 printable characters".to_string(),
        ));
    }

    let outcome = state
        .core
        .orchestrator
        .mint(&tenant, &request.ticket_id, Some(idempotency_key))
        .await?;

    match outcome {
        MintOutcome::Completed(receipt) => Ok((StatusCode::ACCEPTED, Json(to_response(receipt))).into_response()),
        MintOutcome::Replayed {
            response,
            original_request_id,
            recovery_point,
        } => {
            let mut http_response = (StatusCode::OK, Json(response)).into_response();
            let headers = http_response.headers_mut();
            headers.insert("X-Idempotent-Replayed", "true".parse().expect("static header"));
            if let Ok(value) = original_request_id.parse() {
                headers.insert("X-Idempotent-Original-Request-Id", value);
            }
            if let Ok(value) = recovery_point.to_string().parse() {
                headers.insert("X-Idempotent-Recovery-Point", value);
            }
            Ok(http_response)
        },
        MintOutcome::InFlight { recovery_point } => Err(ApiError::MintInProgress { recovery_point }),
    }
}

fn to_response(receipt: MintReceipt) -> MintResponse {
    MintResponse {
        job_id: receipt.job_id,
        status: receipt.status.to_string(),
        mint_address: receipt.mint_address,
        signature: receipt.signature,
    }
}
