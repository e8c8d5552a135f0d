use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use tokio::sync::RwLock;

#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// Returns the number of receivers, or `None` when no connection is configured.
    pub(crate) async fn publish(
        &self,
        channel: &str,
        payload: &str,
    ) -> Result<Option<i64>, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(None);
        };

        let receivers =
            cmd("PUBLISH").arg(channel).arg(payload).query_async::<_, i64>(&mut manager).await?;
        Ok(Some(receivers))
    }

    /// Opens a dedicated pub/sub connection; multiplexed connections cannot subscribe.
    pub(crate) async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<BoxStream<'static, String>, RedisError> {
        let client = Client::open(self.url.clone())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|message| async move {
                match message.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(err) => {
                        tracing::warn!(error = %err, "Dropping non-text pub/sub payload");
                        None
                    }
                }
            })
            .boxed();

        Ok(stream)
    }
}
