use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::CounterStore;
use crate::error::StoreError;

#[derive(Debug)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process counter store. An expired key is evicted when it is next
/// touched, and all expired keys are swept whenever a poll is created.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, key: &str) -> MutexGuard<'_, HashMap<String, Entry>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()))
        {
            entries.remove(key);
        }
        entries
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.lock(key);

        let Some(Entry {
            value: Value::Hash(hash),
            ..
        }) = entries.get_mut(key)
        else {
            return Err(StoreError::NotFound);
        };

        let Some(current) = hash.get_mut(field) else {
            return Err(StoreError::NotFound);
        };

        let count = current
            .parse::<i64>()
            .map_err(|e| StoreError::Unavailable(format!("field {field} is not an integer: {e}")))?
            + delta;
        *current = count.to_string();

        Ok(count)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let entries = self.lock(key);

        Ok(match entries.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.contains(member),
            _ => false,
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.lock(key);

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });

        match &mut entry.value {
            Value::Set(set) => Ok(set.insert(member.to_string())),
            Value::Hash(_) => Err(StoreError::Unavailable(format!(
                "key {key} holds the wrong kind of value"
            ))),
        }
    }

    async fn read_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let entries = self.lock(key);

        Ok(match entries.get(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => hash.clone(),
            _ => HashMap::new(),
        })
    }

    async fn create(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut entries = self.lock(key);
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(fields),
                expires_at: Some(now + ttl),
            },
        );

        Ok(())
    }

    /// No-op for missing keys, matching Redis.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.lock(key);

        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
