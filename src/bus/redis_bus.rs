use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tracing::warn;

use super::{BroadcastBus, BusMessage, BusStream};
use crate::error::StoreError;

/// Publishes over the shared connection manager; each wildcard subscription
/// holds its own dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    connection: ConnectionManager,
}

impl RedisBus {
    pub fn new(client: Client, connection: ConnectionManager) -> Self {
        Self { client, connection }
    }
}

#[async_trait]
impl BroadcastBus for RedisBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _receivers: i64 = connection.publish(topic, payload).await?;
        Ok(())
    }

    async fn subscribe_wildcard(&self, pattern: &str) -> Result<BusStream, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;

        let stream = pubsub.into_on_message().filter_map(|message| async move {
            match message.get_payload::<String>() {
                Ok(payload) => Some(BusMessage {
                    topic: message.get_channel_name().to_string(),
                    payload,
                }),
                Err(e) => {
                    warn!("Dropping undecodable bus message: {e}");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}
