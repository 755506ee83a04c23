//! Shared infrastructure primitives used by both pipelines.
//!
//! Everything here is deliberately free of ticketing semantics: a KV adapter
//! with TTL and atomic set-if-absent, a single-holder distributed lock built
//! on it, an idempotency store, a circuit breaker, per-category bulkheads,
//! and the HMAC scheme that authenticates internal service-to-service calls.

mod bulkhead;
mod circuit;
mod hmac_auth;
mod idempotency;
mod kv;
mod lock;

pub use bulkhead::{Bulkhead, BulkheadCategory, BulkheadConfig, BulkheadFull, BulkheadPermit};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use hmac_auth::{DriftHistogram, InternalAuth, InternalAuthError, SignedHeaders};
pub use idempotency::{
    BeginOutcome, IdempotencyEntry, IdempotencyStatus, IdempotencyStore, validate_idempotency_key,
};
pub use kv::{FallbackKv, InMemoryKv, KvError, KvStore};
pub use lock::{DistributedLock, LockError};
