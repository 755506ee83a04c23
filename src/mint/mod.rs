//! Mint orchestration: the crash-safe pipeline from a mint request to a
//! confirmed on-chain transaction and an updated ticket.
//!
//! - [`MintOrchestrator`] drives the INITIATED → … → COMPLETED state machine,
//!   checkpointing every transition in the [`recovery`] store, serialized per
//!   ticket by the distributed lock, deduplicated by the idempotency store.
//! - [`dlq`] classifies failures, schedules exponential-backoff retries, and
//!   runs the background processor that executes them.
//! - [`metadata`] is the external token-metadata storage adapter.

pub mod dlq;
pub mod metadata;
pub mod orchestrator;
pub mod recovery;

pub use dlq::{DeadLetterQueue, DlqProcessor, RetryHandler, backoff_ms, classify};
pub use metadata::{InMemoryMetadataStore, MetadataError, MetadataStore};
pub use orchestrator::{MintError, MintOrchestrator, MintOutcome, MintReceipt};
pub use recovery::{RecoveryMetadata, RecoveryState, RecoveryStore};
