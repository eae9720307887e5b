use std::sync::Arc;
use std::time::Duration;

use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::bus::{BroadcastBus, MemoryBus, RedisBus};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::StoreError;
use crate::registry::SubscriptionRegistry;
use crate::store::{CounterStore, MemoryStore, RedisStore};
use crate::votes::VoteProcessor;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn CounterStore>,
    pub votes: Arc<VoteProcessor>,
    pub registry: Arc<SubscriptionRegistry>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, StoreError> {
        let (store, bus): (Arc<dyn CounterStore>, Arc<dyn BroadcastBus>) = match &config.redis_url
        {
            Some(redis_url) => {
                info!("Using Redis counter store and bus");
                let (client, connection) = init_redis(redis_url).await?;
                (
                    Arc::new(RedisStore::new(connection.clone())),
                    Arc::new(RedisBus::new(client, connection)),
                )
            }
            None => {
                info!("REDIS_URL not set, using in-process counter store and bus");
                (Arc::new(MemoryStore::new()), Arc::new(MemoryBus::new()))
            }
        };

        Self::with_backends(config, store, bus).await
    }

    pub async fn with_backends(
        config: Config,
        store: Arc<dyn CounterStore>,
        bus: Arc<dyn BroadcastBus>,
    ) -> Result<Self, StoreError> {
        let registry = Arc::new(SubscriptionRegistry::new());
        let votes = Arc::new(VoteProcessor::new(Arc::clone(&store), Arc::clone(&bus)));

        Dispatcher::new(Arc::clone(&registry)).spawn(bus).await?;

        let health_store = Arc::clone(&store);
        let health_registry = Arc::clone(&registry);
        let period = config.health_check_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                match health_store.ping().await {
                    Ok(()) => debug!(polls = health_registry.poll_count(), "Counter store healthy"),
                    Err(e) => error!("Counter store health check failed: {}", e),
                }
            }
        });

        Ok(AppState {
            config: Arc::new(config),
            store,
            votes,
            registry,
        })
    }
}

async fn init_redis(redis_url: &str) -> Result<(Client, ConnectionManager), StoreError> {
    let client = Client::open(redis_url)?;
    let config = ConnectionManagerConfig::new().set_number_of_retries(1);
    let connection = client.get_connection_manager_with_config(config).await?;

    Ok((client, connection))
}
