pub(crate) mod events;
pub(crate) mod feed;
pub(crate) mod hub;
pub(crate) mod relay;

pub(crate) use events::{RealtimeEvent, Topic};
pub(crate) use feed::ActivityFeed;
pub(crate) use hub::{BroadcastError, Broadcaster, LocalHub};
pub(crate) use relay::RedisRelay;
