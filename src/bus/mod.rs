//! # Broadcast Bus
//!
//! Topic-keyed publish/subscribe, one topic per poll. Delivery is at-most-once
//! and a subscription stream cannot be restarted once it ends.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StoreError;

mod memory;
mod redis_bus;

pub use memory::MemoryBus;
pub use redis_bus::RedisBus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

pub type BusStream = BoxStream<'static, BusMessage>;

#[async_trait]
pub trait BroadcastBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError>;

    /// Subscribes to every topic matching a glob pattern such as `updates:*`.
    async fn subscribe_wildcard(&self, pattern: &str) -> Result<BusStream, StoreError>;
}

/// Glob matching for the patterns the dispatcher uses: a trailing `*` or an exact topic.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}
