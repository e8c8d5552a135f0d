use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use super::events::RealtimeEvent;

#[derive(Debug, Error)]
pub(crate) enum BroadcastError {
    #[error("relay publish failed: {0}")]
    Relay(#[from] redis::RedisError),
    #[error("event encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Fan-out port used by the lifecycle controller. At-most-once, no replay.
#[async_trait]
pub(crate) trait Broadcaster: Send + Sync {
    async fn publish(&self, event: RealtimeEvent) -> Result<(), BroadcastError>;
}

/// In-process fan-out. Every socket and the activity feed hold a receiver and
/// filter by topic themselves.
#[derive(Clone)]
pub(crate) struct LocalHub {
    sender: broadcast::Sender<RealtimeEvent>,
}

impl LocalHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.sender.subscribe()
    }

    /// Returns how many receivers saw the event; zero listeners is not an error.
    pub(crate) fn deliver(&self, event: RealtimeEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub(crate) fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl Broadcaster for LocalHub {
    async fn publish(&self, event: RealtimeEvent) -> Result<(), BroadcastError> {
        let receivers = self.deliver(event);
        tracing::trace!(receivers, "Realtime event delivered locally");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::realtime::events::{EventKind, Topic};
    use uuid::Uuid;

    fn sample(topic: Topic) -> RealtimeEvent {
        RealtimeEvent {
            topic,
            event: EventKind::AttemptStarted,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn publish_without_listeners_is_ok() {
        let hub = LocalHub::new(8);
        assert!(hub.publish(sample(Topic::Admin)).await.is_ok());
        assert_eq!(hub.receiver_count(), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_event() {
        let hub = LocalHub::new(8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        let topic = Topic::Attempt(Uuid::new_v4());

        hub.publish(sample(topic)).await.unwrap();

        assert_eq!(first.recv().await.unwrap().topic, topic);
        assert_eq!(second.recv().await.unwrap().topic, topic);
    }
}
