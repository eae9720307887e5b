//! # Counter Store
//!
//! Shared key/value service holding poll hashes and voted sets. Every call
//! is atomic on its own; nothing here spans two calls.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Adds `delta` to an existing hash field and returns the new value.
    /// Missing keys or fields yield `StoreError::NotFound` and are not created.
    async fn increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Returns `true` when the member was not already present.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Empty when the key does not exist.
    async fn read_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn create(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
