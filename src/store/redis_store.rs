use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager};

use super::CounterStore;
use crate::error::StoreError;

// HINCRBY on its own would create the field, so check first in the same script.
const INCREMENT_EXISTING: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
    return redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
end
return false
"#;

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    increment_script: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            increment_script: Script::new(INCREMENT_EXISTING),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut connection = self.connection.clone();

        let count: Option<i64> = self
            .increment_script
            .key(key)
            .arg(field)
            .arg(delta)
            .invoke_async(&mut connection)
            .await?;

        count.ok_or(StoreError::NotFound)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        Ok(connection.sismember(key, member).await?)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let added: i64 = connection.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn read_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut connection = self.connection.clone();
        Ok(connection.hgetall(key).await?)
    }

    async fn create(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let fields: Vec<(String, String)> = fields.into_iter().collect();

        redis::pipe()
            .atomic()
            .hset_multiple(key, &fields)
            .ignore()
            .expire(key, ttl.as_secs() as i64)
            .ignore()
            .query_async::<()>(&mut connection)
            .await?;

        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: bool = connection.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await?;
        Ok(())
    }
}
