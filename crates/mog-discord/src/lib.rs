//! Discord implementation of the boom store's [`Gateway`].
//!
//! REST calls go through [`RestClient`]; notifications come from a websocket
//! session owned by a background task started with [`Discord::connect`] and
//! fanned out to subscribers by an [`EventHub`].

pub mod error;
pub mod hub;
pub mod rest;
pub mod ws;

use std::sync::Mutex;

use mog_boom::{
    ChannelId, Gateway, GatewayError, MessageId, RemoteMessage, Subscription, SubscriptionId,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use error::DiscordError;
pub use hub::EventHub;
pub use rest::RestClient;

pub struct Discord {
    rest: RestClient,
    hub: EventHub,
    cancel: CancellationToken,
    connection: Mutex<Option<JoinHandle<()>>>,
}

impl Discord {
    /// REST-only client; call [`connect`](Self::connect) to receive notifications.
    pub fn new(rest: RestClient) -> Self {
        Self {
            rest,
            hub: EventHub::new(),
            cancel: CancellationToken::new(),
            connection: Mutex::new(None),
        }
    }

    /// Look up the websocket URL and start the connection task.
    pub async fn connect(&self) -> Result<(), DiscordError> {
        let url = self.rest.gateway_url().await?;
        self.connect_to(url);
        Ok(())
    }

    /// Start the connection task against an explicit websocket URL.
    pub fn connect_to(&self, url: String) {
        let mut slot = self.lock_connection();
        if slot.is_some() {
            tracing::debug!("gateway connection already running");
            return;
        }
        tracing::info!(%url, "connecting to discord gateway");
        *slot = Some(tokio::spawn(ws::run(
            url,
            self.rest.token().to_string(),
            self.hub.clone(),
            self.cancel.child_token(),
        )));
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// Stop the connection task and wait for it to finish.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.lock_connection().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("gateway connection task failed: {e}");
            }
        }
    }

    fn lock_connection(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl Gateway for Discord {
    async fn channel_messages(
        &self,
        channel_id: &ChannelId,
        before: Option<&MessageId>,
        limit: u8,
    ) -> Result<Vec<RemoteMessage>, GatewayError> {
        let page = self
            .rest
            .channel_messages(channel_id.as_str(), before.map(MessageId::as_str), limit)
            .await?;
        Ok(page
            .into_iter()
            .map(|m| {
                let count = m.reaction_count();
                RemoteMessage::new(m.id, count)
            })
            .collect())
    }

    async fn delete_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<(), GatewayError> {
        self.rest
            .delete_message(channel_id.as_str(), message_id.as_str())
            .await
            .map_err(GatewayError::from)
    }

    async fn reaction_count(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<usize, GatewayError> {
        let message = self
            .rest
            .message(channel_id.as_str(), message_id.as_str())
            .await?;
        Ok(message.reaction_count())
    }

    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), GatewayError> {
        self.hub.unsubscribe(id)
    }
}
