use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use super::events::RealtimeEvent;
use super::hub::{BroadcastError, Broadcaster, LocalHub};
use crate::core::redis::RedisHandle;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    origin: Uuid,
    event: RealtimeEvent,
}

/// Delivers locally and mirrors every event to a Redis channel so that other
/// instances can hand it to their own sockets.
#[derive(Clone)]
pub(crate) struct RedisRelay {
    hub: LocalHub,
    redis: RedisHandle,
    channel: String,
    origin: Uuid,
}

impl RedisRelay {
    pub(crate) fn new(hub: LocalHub, redis: RedisHandle, channel: String) -> Self {
        Self { hub, redis, channel, origin: Uuid::new_v4() }
    }

    fn encode(&self, event: RealtimeEvent) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Envelope { origin: self.origin, event })
    }

    /// Hands a relayed payload to local subscribers unless this instance sent it.
    fn accept(&self, payload: &str) -> Option<RealtimeEvent> {
        match serde_json::from_str::<Envelope>(payload) {
            Ok(envelope) if envelope.origin == self.origin => None,
            Ok(envelope) => Some(envelope.event),
            Err(err) => {
                tracing::warn!(error = %err, "Dropping malformed relay payload");
                None
            }
        }
    }

    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.redis.subscribe(&self.channel).await {
                Ok(mut stream) => {
                    tracing::info!(channel = %self.channel, "Realtime relay subscribed");
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            next = stream.next() => match next {
                                Some(payload) => {
                                    if let Some(event) = self.accept(&payload) {
                                        self.hub.deliver(event);
                                    }
                                }
                                None => {
                                    tracing::warn!(channel = %self.channel, "Realtime relay stream ended");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, channel = %self.channel, "Realtime relay subscribe failed");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }
}

#[async_trait]
impl Broadcaster for RedisRelay {
    async fn publish(&self, event: RealtimeEvent) -> Result<(), BroadcastError> {
        let payload = self.encode(event.clone())?;
        self.hub.deliver(event);
        self.redis.publish(&self.channel, &payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::realtime::events::{EventKind, Topic};

    fn relay() -> RedisRelay {
        RedisRelay::new(
            LocalHub::new(8),
            RedisHandle::new("redis://127.0.0.1:6379/1".to_string()),
            "cbt:test".to_string(),
        )
    }

    fn sample() -> RealtimeEvent {
        RealtimeEvent {
            topic: Topic::Admin,
            event: EventKind::StudentCompletedExam,
            payload: serde_json::json!({"score": 1.0}),
        }
    }

    #[test]
    fn own_payloads_are_not_redelivered() {
        let relay = relay();
        let payload = relay.encode(sample()).unwrap();

        assert!(relay.accept(&payload).is_none());
    }

    #[test]
    fn foreign_payloads_are_delivered() {
        let sender = relay();
        let receiver = relay();
        let payload = sender.encode(sample()).unwrap();

        assert_eq!(receiver.accept(&payload), Some(sample()));
        assert!(receiver.accept("not json").is_none());
    }

    #[tokio::test]
    async fn publish_without_redis_still_reaches_local_subscribers() {
        let relay = relay();
        let mut local = relay.hub.subscribe();

        relay.publish(sample()).await.expect("publish");

        assert_eq!(local.recv().await.unwrap(), sample());
    }
}
