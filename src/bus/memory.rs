use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::{BroadcastBus, BusMessage, BusStream, topic_matches};
use crate::error::StoreError;

const BUS_CAPACITY: usize = 1024;

/// In-process bus over a single tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<BusMessage>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }
}

#[async_trait]
impl BroadcastBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError> {
        // no live subscribers is not an error, the message is simply lost
        let _ = self.tx.send(BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe_wildcard(&self, pattern: &str) -> Result<BusStream, StoreError> {
        let mut rx = self.tx.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(message) if topic_matches(&pattern, &message.topic) => yield message,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bus subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wildcard_subscription_filters_topics() {
        let bus = MemoryBus::new();
        let mut stream = bus.subscribe_wildcard("updates:*").await.unwrap();

        bus.publish("other:p1", "ignored").await.unwrap();
        bus.publish("updates:p1", "first").await.unwrap();
        bus.publish("updates:p2", "second").await.unwrap();

        let message = stream.next().await.unwrap();
        assert_eq!(message.topic, "updates:p1");
        assert_eq!(message.payload, "first");

        let message = stream.next().await.unwrap();
        assert_eq!(message.topic, "updates:p2");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = MemoryBus::new();
        assert!(bus.publish("updates:p1", "lost").await.is_ok());
    }
}
