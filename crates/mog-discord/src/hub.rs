/// Fan-out of gateway notifications to subscribers.
///
/// Delivery never waits: a subscriber whose buffer is full misses the event.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mog_boom::{GatewayError, GatewayEvent, Subscription, SubscriptionId};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Per-subscriber buffer.
pub const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    next_id: SubscriptionId,
    senders: HashMap<SubscriptionId, mpsc::Sender<GatewayEvent>>,
}

#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<Mutex<Inner>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.senders.insert(id, tx);
        Subscription { id, events: rx }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), GatewayError> {
        self.lock()
            .senders
            .remove(&id)
            .map(|_| ())
            .ok_or(GatewayError::UnknownSubscription(id))
    }

    pub fn len(&self) -> usize {
        self.lock().senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `event` to every subscriber without blocking.
    pub fn publish(&self, event: &GatewayEvent) {
        let inner = self.lock();
        for (id, tx) in &inner.senders {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscription = id, "subscriber lagging, event dropped");
                }
                // Receiver dropped without unsubscribing; keep the slot until it does.
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
