//! RESTful HTTP surface of the scan and mint cores.
//!
//! # Endpoints
//!
//! - `POST /scan` - validate a ticket scan
//! - `POST /offline/manifest` - produce an offline validation manifest
//! - `POST /mint` - mint a ticket's token (idempotent via `Idempotency-Key`)
//! - `GET /healthz` - liveness
//! - `GET /swagger-ui` / `GET /openapi.json` - interactive documentation
//!
//! # Auth context
//!
//! Token verification happens at the platform gateway; this service trusts
//! the identity headers the gateway injects (`x-tenant-id`, `x-staff-id`,
//! `x-venue-id`, `x-staff-role`) and enforces tenant isolation with them.
//! Endpoints that mutate tenant-scoped state refuse to run without a tenant.
//!
//! # Errors
//!
//! All failures serialize as Problem Details (see [`error::ApiError`]);
//! bulkhead rejections additionally carry `Retry-After` and `X-Bulkhead-*`
//! headers.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::{Json, Router, routing::get, routing::post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::core::Core;
use crate::models::{StaffContext, StaffRole, TenantId};

pub mod error;
pub mod mint;
pub mod scan;
pub mod types;

pub use error::ApiError;

/// Application state shared across all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
}

/// Builds a [`StaffContext`] from the gateway's identity headers, when all
/// of them are present.
pub(crate) fn staff_from_headers(headers: &HeaderMap) -> Option<StaffContext> {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    let staff_id = get("x-staff-id")?;
    let tenant_id = get("x-tenant-id")?;
    let venue_id = get("x-venue-id")?;
    let role = get("x-staff-role")
        .and_then(|r| StaffRole::from_header(&r))
        .unwrap_or(StaffRole::Staff);

    Some(StaffContext {
        staff_id,
        tenant_id: TenantId::new(tenant_id),
        venue_id,
        role,
    })
}

impl StaffRole {
    fn from_header(value: &str) -> Option<Self> {
        match value {
            "staff" => Some(StaffRole::Staff),
            "tenant_admin" => Some(StaffRole::TenantAdmin),
            "platform_admin" => Some(StaffRole::PlatformAdmin),
            _ => None,
        }
    }
}

pub(crate) fn require_tenant(headers: &HeaderMap) -> Result<TenantId, ApiError> {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(TenantId::new)
        .ok_or_else(|| ApiError::Unauthorized("Missing tenant context".to_string()))
}

async fn api_health() -> Json<types::HealthResponse> {
    Json(types::HealthResponse { status: "ok" })
}

/// OpenAPI documentation for the scan/mint surface, served at
/// `/openapi.json` and browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(scan::api_scan, scan::api_offline_manifest, mint::api_mint),
    components(
        schemas(
            types::ScanRequest,
            types::ScanResponse,
            types::ManifestRequest,
            types::MintRequest,
            types::MintResponse,
            error::ApiError,
            crate::scan::OfflineManifest,
            crate::scan::ManifestEntry,
            crate::scan::TicketSummary,
            crate::models::ScanResult,
            crate::models::ScanReason,
            crate::models::TicketStatus,
            crate::models::AccessLevel,
            crate::models::RecoveryPoint,
        )
    ),
    tags(
        (name = "scan", description = "Ticket scan validation"),
        (name = "mint", description = "Blockchain mint orchestration"),
    )
)]
pub struct ApiDoc;

/// Creates the API router over a fully assembled [`Core`].
pub fn create_router(core: Arc<Core>) -> Router {
    let app_state = AppState { core };

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()))
        .route("/scan", post(scan::api_scan))
        .route("/offline/manifest", post(scan::api_offline_manifest))
        .route("/mint", post(mint::api_mint))
        .route("/healthz", get(api_health))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainRpc, MockChain};
    use crate::config::{Settings, load_secrets};
    use crate::db::test_support::{seed_device, seed_event, seed_ticket, test_pool};
    use crate::infra::InMemoryKv;
    use crate::mint::InMemoryMetadataStore;
    use crate::models::{AccessLevel, TicketStatus, Zone};
    use crate::scan::encode_qr;
    use crate::vault::InMemoryKms;
    use chrono::Utc;
    use serde_json::{Value, json};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const IDEM_KEY: &str = "api-mint-0123456789abcdef";

    async fn serve() -> (String, tempfile::TempDir) {
        let (pool, dir) = test_pool();
        let tenant = TenantId::new("t-1");
        {
            let conn = pool.get().unwrap();
            seed_event(&conn, &tenant, "ev-1", "v-1");
            seed_ticket(&conn, &tenant, "tk-1", "ev-1", "v-1", TicketStatus::Sold, AccessLevel::Ga, SECRET);
            seed_device(&conn, &tenant, "dev-1", "v-1", Zone::Ga);
        }

        let settings = Settings::from_config(config::Config::builder().build().unwrap()).unwrap();
        let secrets = load_secrets(false).unwrap();
        let core = Core::build(
            &settings,
            &secrets,
            pool,
            Arc::new(InMemoryKv::new()),
            vec![("rpc-0".to_string(), Arc::new(MockChain::new()) as Arc<dyn ChainRpc>)],
            Arc::new(InMemoryKms::new()),
            Arc::new(InMemoryMetadataStore::new()),
        )
        .unwrap();

        let router = create_router(core);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (format!("http://{}", addr), dir)
    }

    #[tokio::test]
    async fn test_scan_endpoint_end_to_end() {
        let (base, _dir) = serve().await;
        let client = reqwest::Client::new();

        let qr = encode_qr("tk-1", Utc::now().timestamp_millis(), "n-1", SECRET);
        let response = client
            .post(format!("{}/scan", base))
            .json(&json!({"qr": qr, "device_id": "dev-1"}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["valid"], true);
        assert_eq!(body["result"], "ALLOW");
        assert_eq!(body["reason"], "FIRST_ENTRY");
        assert_eq!(body["scan_count"], 1);

        // Same QR again: replay.
        let response = client
            .post(format!("{}/scan", base))
            .json(&json!({"qr": qr, "device_id": "dev-1"}))
            .send()
            .await
            .unwrap();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["valid"], false);
        assert_eq!(body["reason"], "QR_ALREADY_USED");
    }

    #[tokio::test]
    async fn test_mint_endpoint_idempotency_flow() {
        let (base, _dir) = serve().await;
        let client = reqwest::Client::new();

        // Missing key: 400.
        let response = client
            .post(format!("{}/mint", base))
            .header("x-tenant-id", "t-1")
            .json(&json!({"ticket_id": "tk-1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        // First mint: 202.
        let response = client
            .post(format!("{}/mint", base))
            .header("x-tenant-id", "t-1")
            .header("Idempotency-Key", IDEM_KEY)
            .json(&json!({"ticket_id": "tk-1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);
        let first: Value = response.json().await.unwrap();
        assert_eq!(first["status"], "COMPLETED");
        assert!(first["mint_address"].as_str().is_some());

        // Replay: 200, identical body, replay headers.
        let response = client
            .post(format!("{}/mint", base))
            .header("x-tenant-id", "t-1")
            .header("Idempotency-Key", IDEM_KEY)
            .json(&json!({"ticket_id": "tk-1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().get("X-Idempotent-Replayed").unwrap(), "true");
        assert!(response.headers().get("X-Idempotent-Original-Request-Id").is_some());
        assert_eq!(response.headers().get("X-Idempotent-Recovery-Point").unwrap(), "COMPLETED");
        let replayed: Value = response.json().await.unwrap();
        assert_eq!(replayed, first);
    }

    #[tokio::test]
    async fn test_mint_requires_tenant() {
        let (base, _dir) = serve().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/mint", base))
            .header("Idempotency-Key", IDEM_KEY)
            .json(&json!({"ticket_id": "tk-1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "auth");
        assert_eq!(body["status"], 401);
    }

    #[tokio::test]
    async fn test_manifest_endpoint() {
        let (base, _dir) = serve().await;
        let client = reqwest::Client::new();

        // dev-1 is not offline-capable.
        let response = client
            .post(format!("{}/offline/manifest", base))
            .header("x-tenant-id", "t-1")
            .json(&json!({"event_id": "ev-1", "device_id": "dev-1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn test_health() {
        let (base, _dir) = serve().await;
        let response = reqwest::get(format!("{}/healthz", base)).await.unwrap();
        assert_eq!(response.status(), 200);
    }
}
