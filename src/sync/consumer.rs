use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::http::InternalServiceClient;
use crate::mint::{MintError, MintOrchestrator, MintOutcome};
use crate::models::TenantId;
use crate::sync::bus::{BusDelivery, MessageBus};
use crate::sync::messages::{ACTION_CREATE_EVENT, SyncRequest};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Consumer of `event.blockchain_sync_requested`.
///
/// Each delivery is parsed, handed to the mint orchestrator, and settled:
/// ACK on success, NACK-with-requeue while attempts remain, broker DLQ plus
/// a `status="failed"` callback once they run out.
pub struct SyncConsumer {
    bus: Arc<dyn MessageBus>,
    orchestrator: Arc<MintOrchestrator>,
    callback: Arc<InternalServiceClient>,
}

enum Settlement {
    Ack,
    Requeue(String),
    DeadLetter(String),
}

impl SyncConsumer {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        orchestrator: Arc<MintOrchestrator>,
        callback: Arc<InternalServiceClient>,
    ) -> Self {
        Self {
            bus,
            orchestrator,
            callback,
        }
    }

    pub fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Sync consumer started.");
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.drain_available().await {
                            error!(error:% = e; "Error draining sync queue");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Sync consumer received shutdown signal.");
                        break;
                    }
                }
            }
        })
    }

    /// Processes every delivery currently available, settling each.
    pub async fn drain_available(&self) -> Result<(), anyhow::Error> {
        while let Some(delivery) = self.bus.receive().await? {
            let id = delivery.id;
            match self.process_delivery(&delivery).await {
                Settlement::Ack => self.bus.ack(id).await?,
                Settlement::Requeue(reason) => {
                    warn!(
                        delivery_id = id,
                        attempt = delivery.attempt,
                        reason = &*reason;
                        "Sync delivery failed, requeueing"
                    );
                    self.bus.nack_requeue(id).await?;
                },
                Settlement::DeadLetter(reason) => {
                    error!(
                        delivery_id = id,
                        attempt = delivery.attempt,
                        reason = &*reason;
                        "Sync delivery exhausted, routing to DLQ"
                    );
                    self.bus.route_to_dlq(id).await?;
                },
            }
        }
        Ok(())
    }

    async fn process_delivery(&self, delivery: &BusDelivery) -> Settlement {
        let request: SyncRequest = match serde_json::from_str(&delivery.payload) {
            Ok(r) => r,
            Err(e) => {
                // Malformed payloads never become parseable; no requeue.
                return Settlement::DeadLetter(format!("unparseable payload: {}", e));
            },
        };

        if request.action != ACTION_CREATE_EVENT {
            return Settlement::DeadLetter(format!("unsupported action '{}'", request.action));
        }

        match self.handle_create_event(&request).await {
            Ok(()) => {
                if let Err(e) = self
                    .callback
                    .put_blockchain_status(&request.event_id, "completed", None)
                    .await
                {
                    // The mint finished; a lost callback is not worth
                    // re-minting over. The event service reconciles.
                    warn!(event_id = &*request.event_id, error:% = e; "Success callback failed");
                }
                Settlement::Ack
            },
            Err(e) => {
                if delivery.attempt < MAX_DELIVERY_ATTEMPTS {
                    Settlement::Requeue(e.to_string())
                } else {
                    if let Err(ce) = self
                        .callback
                        .put_blockchain_status(&request.event_id, "failed", Some(&e.to_string()))
                        .await
                    {
                        error!(event_id = &*request.event_id, error:% = ce; "Failure callback failed");
                    }
                    Settlement::DeadLetter(e.to_string())
                }
            },
        }
    }

    async fn handle_create_event(&self, request: &SyncRequest) -> Result<(), MintError> {
        let tenant = TenantId::new(request.metadata.tenant_id.clone());

        for ticket_id in &request.blockchain_data.ticket_ids {
            // Deterministic key: redelivery of the same event/ticket pair is
            // a replay, not a second mint.
            let idempotency_key = format!("sync-{}-{}", request.event_id, ticket_id);
            match self.orchestrator.mint(&tenant, ticket_id, Some(&idempotency_key)).await? {
                MintOutcome::Completed(receipt) => {
                    info!(
                        ticket_id = ticket_id.as_str(),
                        job_id = &*receipt.job_id;
                        "Sync mint completed"
                    );
                },
                MintOutcome::Replayed { .. } => {
                    info!(ticket_id = ticket_id.as_str(); "Sync mint already completed, replayed");
                },
                MintOutcome::InFlight { .. } => {
                    return Err(MintError::Validation(format!(
                        "mint for ticket {} already in flight",
                        ticket_id
                    )));
                },
            }
        }

        Ok(())
    }
}
