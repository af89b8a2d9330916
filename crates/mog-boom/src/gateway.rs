/// Chat gateway seen from the boom store.
///
/// In production: `mog_discord::Discord` (REST + websocket).
/// In tests: [`mock::MockGateway`] (records deletes, serves canned pages).
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::types::{ChannelId, MessageId, RemoteMessage};

/// Notifications delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    MessageCreated {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    MessageDeleted {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    MessagesDeletedBulk {
        channel_id: ChannelId,
        message_ids: Vec<MessageId>,
    },
    ReactionAdded {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    /// One reaction removed; others may remain.
    ReactionRemoved {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    AllReactionsRemoved {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    /// Every reaction of a single emoji removed; others may remain.
    EmojiReactionsRemoved {
        channel_id: ChannelId,
        message_id: MessageId,
    },
}

impl GatewayEvent {
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            GatewayEvent::MessageCreated { channel_id, .. }
            | GatewayEvent::MessageDeleted { channel_id, .. }
            | GatewayEvent::MessagesDeletedBulk { channel_id, .. }
            | GatewayEvent::ReactionAdded { channel_id, .. }
            | GatewayEvent::ReactionRemoved { channel_id, .. }
            | GatewayEvent::AllReactionsRemoved { channel_id, .. }
            | GatewayEvent::EmojiReactionsRemoved { channel_id, .. } => channel_id,
        }
    }

    /// Messages the notification is about.
    pub fn message_ids(&self) -> &[MessageId] {
        match self {
            GatewayEvent::MessagesDeletedBulk { message_ids, .. } => message_ids,
            GatewayEvent::MessageCreated { message_id, .. }
            | GatewayEvent::MessageDeleted { message_id, .. }
            | GatewayEvent::ReactionAdded { message_id, .. }
            | GatewayEvent::ReactionRemoved { message_id, .. }
            | GatewayEvent::AllReactionsRemoved { message_id, .. }
            | GatewayEvent::EmojiReactionsRemoved { message_id, .. } => {
                std::slice::from_ref(message_id)
            }
        }
    }
}

/// Identifier handed out by [`Gateway::subscribe`].
pub type SubscriptionId = u64;

/// A registered notification stream. Dropping the receiver stops delivery
/// but only [`Gateway::unsubscribe`] releases the registration.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::Receiver<GatewayEvent>,
}

#[async_trait::async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// One page of channel history, newest first, strictly older than
    /// `before` when given. An empty page means the history is exhausted.
    async fn channel_messages(
        &self,
        channel_id: &ChannelId,
        before: Option<&MessageId>,
        limit: u8,
    ) -> Result<Vec<RemoteMessage>, GatewayError>;

    /// Delete a message. [`GatewayError::NotFound`] when it is already gone.
    async fn delete_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<(), GatewayError>;

    /// Reactions currently on a message.
    async fn reaction_count(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<usize, GatewayError>;

    /// Register for notifications.
    fn subscribe(&self) -> Subscription;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), GatewayError>;
}

// ── MockGateway (tests) ─────────────────────────────────────────────

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    /// Per-subscriber buffer.
    pub const SUBSCRIBER_CAPACITY: usize = 64;

    #[derive(Default)]
    struct Inner {
        /// Channel history, newest first.
        history: Vec<RemoteMessage>,
        reactions: HashMap<MessageId, usize>,
        deleted: Vec<(ChannelId, MessageId)>,
        delete_attempts: usize,
        /// Scripted delete outcomes, consumed front to back before succeeding.
        delete_results: VecDeque<Result<(), GatewayError>>,
        fail_listing: Option<GatewayError>,
        listing_delay: Option<Duration>,
        lookup_delay: Option<Duration>,
        subscribers: HashMap<SubscriptionId, mpsc::Sender<GatewayEvent>>,
        next_subscription: SubscriptionId,
        unsubscribed: Vec<SubscriptionId>,
    }

    /// In-memory gateway that records every call.
    #[derive(Clone, Default)]
    pub struct MockGateway {
        inner: Arc<Mutex<Inner>>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Replace the channel history (newest first).
        pub fn set_history(&self, history: Vec<RemoteMessage>) {
            let mut inner = self.inner.lock().unwrap();
            for msg in &history {
                inner.reactions.insert(msg.id.clone(), msg.reaction_count);
            }
            inner.history = history;
        }

        pub fn set_reaction_count(&self, message_id: impl Into<MessageId>, count: usize) {
            self.inner
                .lock()
                .unwrap()
                .reactions
                .insert(message_id.into(), count);
        }

        /// Queue the outcome of the next delete call.
        pub fn push_delete_result(&self, result: Result<(), GatewayError>) {
            self.inner.lock().unwrap().delete_results.push_back(result);
        }

        pub fn fail_listing(&self, err: GatewayError) {
            self.inner.lock().unwrap().fail_listing = Some(err);
        }

        /// Delay every history page by `delay`.
        pub fn set_listing_delay(&self, delay: Duration) {
            self.inner.lock().unwrap().listing_delay = Some(delay);
        }

        /// Delay every reaction count lookup by `delay`.
        pub fn set_lookup_delay(&self, delay: Duration) {
            self.inner.lock().unwrap().lookup_delay = Some(delay);
        }

        /// Messages successfully deleted, in order.
        pub fn deleted(&self) -> Vec<(ChannelId, MessageId)> {
            self.inner.lock().unwrap().deleted.clone()
        }

        pub fn delete_attempts(&self) -> usize {
            self.inner.lock().unwrap().delete_attempts
        }

        pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
            self.inner.lock().unwrap().unsubscribed.clone()
        }

        pub fn subscriber_count(&self) -> usize {
            self.inner.lock().unwrap().subscribers.len()
        }

        /// Deliver a notification to every subscriber.
        pub async fn emit(&self, event: GatewayEvent) {
            let senders: Vec<_> = self
                .inner
                .lock()
                .unwrap()
                .subscribers
                .values()
                .cloned()
                .collect();
            for tx in senders {
                let _ = tx.send(event.clone()).await;
            }
        }

        /// Deliver without waiting, the way a live connection does. Returns
        /// how many subscribers took the event; a full buffer misses it.
        pub fn try_emit(&self, event: GatewayEvent) -> usize {
            let inner = self.inner.lock().unwrap();
            inner
                .subscribers
                .values()
                .filter(|tx| tx.try_send(event.clone()).is_ok())
                .count()
        }
    }

    #[async_trait::async_trait]
    impl Gateway for MockGateway {
        async fn channel_messages(
            &self,
            _channel_id: &ChannelId,
            before: Option<&MessageId>,
            limit: u8,
        ) -> Result<Vec<RemoteMessage>, GatewayError> {
            let delay = self.inner.lock().unwrap().listing_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let inner = self.inner.lock().unwrap();
            if let Some(err) = &inner.fail_listing {
                return Err(err.clone());
            }
            let start = match before {
                Some(id) => match inner.history.iter().position(|m| &m.id == id) {
                    Some(pos) => pos + 1,
                    None => inner.history.len(),
                },
                None => 0,
            };
            Ok(inner
                .history
                .iter()
                .skip(start)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn delete_message(
            &self,
            channel_id: &ChannelId,
            message_id: &MessageId,
        ) -> Result<(), GatewayError> {
            let mut inner = self.inner.lock().unwrap();
            inner.delete_attempts += 1;
            let result = inner.delete_results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                inner.deleted.push((channel_id.clone(), message_id.clone()));
                inner.history.retain(|m| &m.id != message_id);
            }
            result
        }

        async fn reaction_count(
            &self,
            _channel_id: &ChannelId,
            message_id: &MessageId,
        ) -> Result<usize, GatewayError> {
            let delay = self.inner.lock().unwrap().lookup_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let inner = self.inner.lock().unwrap();
            inner
                .reactions
                .get(message_id)
                .copied()
                .ok_or_else(|| GatewayError::NotFound(message_id.to_string()))
        }

        fn subscribe(&self) -> Subscription {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_subscription;
            inner.next_subscription += 1;
            let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
            inner.subscribers.insert(id, tx);
            Subscription { id, events: rx }
        }

        fn unsubscribe(&self, id: SubscriptionId) -> Result<(), GatewayError> {
            let mut inner = self.inner.lock().unwrap();
            inner
                .subscribers
                .remove(&id)
                .ok_or(GatewayError::UnknownSubscription(id))?;
            inner.unsubscribed.push(id);
            Ok(())
        }
    }
}
