use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown delivery id {0}")]
    UnknownDelivery(u64),
}

/// One in-flight delivery. `attempt` starts at 1 and is tracked by the
/// broker across requeues (headers on the wire).
#[derive(Debug, Clone)]
pub struct BusDelivery {
    pub id: u64,
    pub payload: String,
    pub attempt: u32,
}

/// The slice of the message broker this core consumes. Connection management
/// belongs to the broker client wired in production; [`InMemoryBus`] stands
/// in for tests.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Next pending delivery, if any. The delivery stays unacknowledged
    /// until `ack`, `nack_requeue`, or `route_to_dlq` settles it.
    async fn receive(&self) -> Result<Option<BusDelivery>, BusError>;

    async fn ack(&self, id: u64) -> Result<(), BusError>;

    /// Returns the delivery to the queue with its attempt count bumped.
    async fn nack_requeue(&self, id: u64) -> Result<(), BusError>;

    /// Terminal: hand the delivery to the broker's dead-letter queue.
    async fn route_to_dlq(&self, id: u64) -> Result<(), BusError>;
}

#[derive(Default)]
struct InMemoryBusState {
    next_id: u64,
    pending: VecDeque<BusDelivery>,
    unacked: Vec<BusDelivery>,
    dead_lettered: Vec<BusDelivery>,
}

/// Broker fake with real ack/requeue semantics.
#[derive(Default)]
pub struct InMemoryBus {
    state: Mutex<InMemoryBusState>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, payload: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.pending.push_back(BusDelivery {
            id,
            payload: payload.to_string(),
            attempt: 1,
        });
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.state.lock().unwrap().dead_lettered.len()
    }

    fn take_unacked(state: &mut InMemoryBusState, id: u64) -> Result<BusDelivery, BusError> {
        let index = state
            .unacked
            .iter()
            .position(|d| d.id == id)
            .ok_or(BusError::UnknownDelivery(id))?;
        Ok(state.unacked.swap_remove(index))
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn receive(&self) -> Result<Option<BusDelivery>, BusError> {
        let mut state = self.state.lock().unwrap();
        let Some(delivery) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.unacked.push(delivery.clone());
        Ok(Some(delivery))
    }

    async fn ack(&self, id: u64) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        Self::take_unacked(&mut state, id)?;
        Ok(())
    }

    async fn nack_requeue(&self, id: u64) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        let mut delivery = Self::take_unacked(&mut state, id)?;
        delivery.attempt += 1;
        state.pending.push_back(delivery);
        Ok(())
    }

    async fn route_to_dlq(&self, id: u64) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        let delivery = Self::take_unacked(&mut state, id)?;
        state.dead_lettered.push(delivery);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ack_settles_delivery() {
        let bus = InMemoryBus::new();
        bus.publish("one");

        let delivery = bus.receive().await.unwrap().unwrap();
        assert_eq!(delivery.attempt, 1);
        bus.ack(delivery.id).await.unwrap();

        assert!(bus.receive().await.unwrap().is_none());
        assert_eq!(bus.dead_letter_count(), 0);
    }

    #[tokio::test]
    async fn test_nack_requeues_with_attempt_bump() {
        let bus = InMemoryBus::new();
        bus.publish("one");

        let delivery = bus.receive().await.unwrap().unwrap();
        bus.nack_requeue(delivery.id).await.unwrap();

        let delivery = bus.receive().await.unwrap().unwrap();
        assert_eq!(delivery.attempt, 2);

        bus.route_to_dlq(delivery.id).await.unwrap();
        assert_eq!(bus.dead_letter_count(), 1);
    }
}
