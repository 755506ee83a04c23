//! Turnstile: the scan-validation and mint-orchestration core of a
//! multi-tenant event-ticketing platform.
//!
//! Two cooperating pipelines share one set of infrastructure primitives:
//!
//! - **Scan validation**: QR verification with replay protection,
//!   tenant/venue isolation, ticket-state and temporal checks, zone policy,
//!   duplicate/re-entry rules, offline manifests, and post-scan anomaly
//!   detection. Every decision persists a scan event in the same database
//!   transaction that produced it.
//!
//! - **Mint orchestration**: a crash-safe state machine that drives a ticket
//!   from INITIATED to COMPLETED through per-step recovery checkpoints,
//!   serialized per ticket by a distributed lock, deduplicated by an
//!   idempotency store, with failures classified into a dead-letter queue.
//!
//! # Architecture
//!
//! - [`scan`]: the per-scan decision engine and offline manifest builder
//! - [`anomaly`]: post-scan risk heuristics
//! - [`mint`]: the mint orchestrator, recovery store, and DLQ
//! - [`chain`]: fee estimation, transaction build/submit/confirm, RPC
//!   failover
//! - [`vault`]: custodial keypairs under KMS envelope encryption
//! - [`treasury`]: destination whitelist and balance/drain monitoring
//! - [`infra`]: KV adapter, distributed lock, idempotency store, circuit
//!   breaker, bulkhead, internal HMAC auth
//! - [`sync`]: the blockchain-sync message consumer
//! - [`api`]: the axum HTTP surface with Swagger documentation
//! - [`db`]: SQLite persistence with explicit tenant scoping on every query
//! - [`core`]: the explicit application context wiring it all together
//!
//! # Multi-tenancy
//!
//! Every tenant-scoped table carries a `tenant_id`, and every query against
//! one takes a [`models::TenantId`] bound as a SQL parameter. Cross-tenant
//! probes are answered as not-found and logged to the audit target; row
//! existence is never revealed across tenants.

pub mod anomaly;
pub mod api;
pub mod chain;
pub mod config;
pub mod core;
pub mod daemon;
pub mod db;
pub mod http;
pub mod infra;
pub mod log;
pub mod mint;
pub mod models;
pub mod scan;
pub mod sync;
pub mod treasury;
pub mod vault;

pub use crate::api::ApiDoc;
pub use crate::core::Core;
pub use crate::db::init_db;
pub use crate::mint::{MintOrchestrator, MintOutcome, MintReceipt};
pub use crate::models::TenantId;
pub use crate::scan::{ScanDecider, ScanDecision};
