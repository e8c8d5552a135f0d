use std::sync::Arc;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::services::attempt_lifecycle::AttemptService;
use crate::services::realtime::{ActivityFeed, LocalHub};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    attempts: AttemptService,
    hub: LocalHub,
    feed: ActivityFeed,
    redis: RedisHandle,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        attempts: AttemptService,
        hub: LocalHub,
        feed: ActivityFeed,
        redis: RedisHandle,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, attempts, hub, feed, redis }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn attempts(&self) -> &AttemptService {
        &self.inner.attempts
    }

    /// Local fan-out that every WebSocket connection subscribes to.
    pub(crate) fn hub(&self) -> &LocalHub {
        &self.inner.hub
    }

    pub(crate) fn feed(&self) -> &ActivityFeed {
        &self.inner.feed
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }
}
