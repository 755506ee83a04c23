use axum::{Json, extract::State, http::HeaderMap};
use log::error;

use crate::api::error::ApiError;
use crate::api::types::{ManifestRequest, ScanRequest, ScanResponse};
use crate::api::{AppState, require_tenant, staff_from_headers};
use crate::infra::BulkheadCategory;
use crate::models::ScanResult;
use crate::scan::OfflineManifest;

/// Validates one ticket scan.
#[utoipa::path(
    post,
    path = "/scan",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Scan decided; result and reason in the body", body = ScanResponse),
        (status = 400, description = "Malformed request body", body = ApiError),
        (status = 503, description = "Scan capacity exhausted", body = ApiError),
    ),
    tag = "scan"
)]
pub async fn api_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, ApiError> {
    let _permit = state.core.bulkhead.try_acquire(BulkheadCategory::Query)?;

    if request.qr.is_empty() || request.device_id.is_empty() {
        return Err(ApiError::InvalidPayload("qr and device_id are required".to_string()));
    }

    let staff = staff_from_headers(&headers);
    let decision = state
        .core
        .decider
        .decide(&request.qr, &request.device_id, staff.as_ref())
        .await;

    // Anomaly heuristics run after the reply is decided and never delay it.
    if decision.result != ScanResult::Error {
        let core = state.core.clone();
        let device_id = request.device_id.clone();
        let ticket_id = request.qr.split(':').next().unwrap_or_default().to_string();
        if !ticket_id.is_empty() {
            tokio::spawn(async move {
                let pool = core.db_pool.clone();
                let lookup_device_id = device_id.clone();
                let device = tokio::task::spawn_blocking(move || {
                    let conn = pool.get()?;
                    crate::db::get_device(&conn, &lookup_device_id)
                })
                .await;

                match device {
                    Ok(Ok(Some(device))) => {
                        let _ = core.anomaly.analyze(&device.tenant_id, &ticket_id, &device_id).await;
                    },
                    Ok(Ok(None)) => {},
                    Ok(Err(e)) => error!(error:% = e; "Anomaly pass could not resolve device"),
                    Err(e) => error!(error:% = e; "Anomaly pass task panicked"),
                }
            });
        }
    }

    Ok(Json(decision.into()))
}

/// Produces an offline validation manifest for a device.
#[utoipa::path(
    post,
    path = "/offline/manifest",
    request_body = ManifestRequest,
    responses(
        (status = 200, description = "Manifest for the event and device", body = OfflineManifest),
        (status = 401, description = "Device not eligible for offline scanning", body = ApiError),
        (status = 404, description = "Event not found", body = ApiError),
    ),
    tag = "scan"
)]
pub async fn api_offline_manifest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ManifestRequest>,
) -> Result<Json<OfflineManifest>, ApiError> {
    let _permit = state.core.bulkhead.try_acquire(BulkheadCategory::Query)?;
    let tenant = require_tenant(&headers)?;

    let manifest = state
        .core
        .manifest_builder
        .generate(&tenant, &request.event_id, &request.device_id)
        .await?;

    Ok(Json(manifest))
}
