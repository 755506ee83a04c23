//! Message-bus consumer for blockchain sync requests.
//!
//! The event service publishes `event.blockchain_sync_requested`; this module
//! consumes it, drives the mint orchestrator, and reports the outcome back
//! over the signed internal callback. Delivery settlement follows the broker
//! contract: ACK on success, NACK-with-requeue up to three attempts, then the
//! broker's dead-letter queue plus a `status="failed"` callback.

pub mod bus;
pub mod consumer;
pub mod messages;

pub use bus::{BusDelivery, BusError, InMemoryBus, MessageBus};
pub use consumer::{MAX_DELIVERY_ATTEMPTS, SyncConsumer};
pub use messages::{ACTION_CREATE_EVENT, BlockchainData, SyncMetadata, SyncRequest};
