// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message bus seam and an in-process implementation.
//!
//! The bus gives no ordering guarantee across senders and may deliver a
//! message more than once. Handlers on both sides are written for that.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use crate::codec::{self, CodecError};
use crate::messages::ParticipantMessage;

/// Topic the runtime publishes on and participants subscribe to.
pub const PARTICIPANT_TOPIC: &str = "acm-participant";

/// Topic participants publish on and the runtime subscribes to.
pub const RUNTIME_TOPIC: &str = "acm-runtime";

/// Default per-topic buffer of the in-process bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Errors from publishing or receiving.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BusError {
    #[error("bus closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Publish/subscribe primitives used by the runtime and participants.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message on a topic.
    async fn publish(&self, topic: &str, message: &ParticipantMessage) -> Result<(), BusError>;

    /// Subscribe to a topic. Only messages published afterwards are received.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError>;
}

/// Receiving end of a topic subscription.
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<Arc<Vec<u8>>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish()
    }
}

impl Subscription {
    /// Wrap a raw byte channel. Transports bridge into this.
    pub fn new(topic: impl Into<String>, receiver: broadcast::Receiver<Arc<Vec<u8>>>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next decodable message.
    ///
    /// Undecodable payloads and lag are logged and skipped; only a closed
    /// channel ends the subscription.
    pub async fn recv(&mut self) -> Result<ParticipantMessage, BusError> {
        loop {
            match self.receiver.recv().await {
                Ok(bytes) => match codec::decode(&bytes) {
                    Ok(message) => return Ok(message),
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "Dropping undecodable message");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged, messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }
}

/// In-process bus: one broadcast channel per topic, messages carried as
/// encoded JSON so both ends go through the codec.
#[derive(Clone)]
pub struct InMemoryBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<Arc<Vec<u8>>>>>>,
    capacity: usize,
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<Arc<Vec<u8>>> {
        if let Some(sender) = self.topics.read().await.get(topic) {
            return sender.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish raw bytes, bypassing the encoder.
    pub async fn publish_raw(&self, topic: &str, bytes: Vec<u8>) {
        let sender = self.sender(topic).await;
        if sender.send(Arc::new(bytes)).is_err() {
            debug!(topic, "No subscribers for raw message");
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, message: &ParticipantMessage) -> Result<(), BusError> {
        let bytes = codec::encode(message)?;
        let sender = self.sender(topic).await;
        match sender.send(Arc::new(bytes)) {
            Ok(receivers) => debug!(
                topic,
                message_type = message.message_type(),
                message_id = %message.message_id(),
                receivers,
                "Published message"
            ),
            Err(_) => debug!(
                topic,
                message_type = message.message_type(),
                "No subscribers, message dropped"
            ),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let sender = self.sender(topic).await;
        Ok(Subscription::new(topic, sender.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Payload, StatusReq};

    fn status_req() -> ParticipantMessage {
        ParticipantMessage::new(Payload::ParticipantStatusReq(StatusReq {}))
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_the_message() {
        let bus = InMemoryBus::new();
        let mut a = bus.subscribe(PARTICIPANT_TOPIC).await.unwrap();
        let mut b = bus.subscribe(PARTICIPANT_TOPIC).await.unwrap();

        let msg = status_req();
        bus.publish(PARTICIPANT_TOPIC, &msg).await.unwrap();

        assert_eq!(a.recv().await.unwrap().message_id(), msg.message_id());
        assert_eq!(b.recv().await.unwrap().message_id(), msg.message_id());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = InMemoryBus::new();
        let mut runtime_side = bus.subscribe(RUNTIME_TOPIC).await.unwrap();

        bus.publish(PARTICIPANT_TOPIC, &status_req()).await.unwrap();
        let msg = status_req();
        bus.publish(RUNTIME_TOPIC, &msg).await.unwrap();

        assert_eq!(runtime_side.recv().await.unwrap().message_id(), msg.message_id());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_skipped() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe(RUNTIME_TOPIC).await.unwrap();

        bus.publish_raw(RUNTIME_TOPIC, b"{broken".to_vec()).await;
        let msg = status_req();
        bus.publish(RUNTIME_TOPIC, &msg).await.unwrap();

        assert_eq!(sub.recv().await.unwrap().message_id(), msg.message_id());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let bus = InMemoryBus::new();
        assert!(bus.publish(PARTICIPANT_TOPIC, &status_req()).await.is_ok());
    }
}
