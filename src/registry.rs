//! # Subscription Registry
//!
//! Maps a poll id to the observers currently connected to it. Fan-out takes
//! read locks and may run in parallel; register/unregister take the write
//! lock. No lock is ever held across an await point or a delivery.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One tally update on its way to an observer, pre-serialized once for all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub total: i64,
    pub text: Arc<str>,
}

/// Delivery capability the dispatcher uses; must never block.
pub trait Observer: Send + Sync {
    fn id(&self) -> ObserverId;

    fn deliver(&self, update: Outbound) -> Result<(), DeliveryError>;
}

pub type ObserverHandle = Arc<dyn Observer>;

/// Observer backed by a bounded queue drained by the session's writer.
#[derive(Debug, Clone)]
pub struct QueueObserver {
    id: ObserverId,
    tx: mpsc::Sender<Outbound>,
}

impl QueueObserver {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let observer = Self {
            id: ObserverId::new(),
            tx,
        };
        (observer, rx)
    }
}

impl Observer for QueueObserver {
    fn id(&self) -> ObserverId {
        self.id
    }

    fn deliver(&self, update: Outbound) -> Result<(), DeliveryError> {
        self.tx.try_send(update).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    polls: RwLock<HashMap<String, HashMap<ObserverId, ObserverHandle>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, poll_id: &str, handle: ObserverHandle) {
        let mut polls = self.polls.write().unwrap_or_else(PoisonError::into_inner);
        polls
            .entry(poll_id.to_string())
            .or_default()
            .insert(handle.id(), handle);
    }

    /// Safe to call repeatedly; the poll entry is dropped with its last observer.
    pub fn unregister(&self, poll_id: &str, id: ObserverId) {
        let mut polls = self.polls.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(observers) = polls.get_mut(poll_id) {
            observers.remove(&id);
            if observers.is_empty() {
                polls.remove(poll_id);
            }
        }
    }

    /// Point-in-time copy of the observers of a poll.
    pub fn snapshot(&self, poll_id: &str) -> Vec<ObserverHandle> {
        let polls = self.polls.read().unwrap_or_else(PoisonError::into_inner);
        polls
            .get(poll_id)
            .map(|observers| observers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn observer_count(&self, poll_id: &str) -> usize {
        let polls = self.polls.read().unwrap_or_else(PoisonError::into_inner);
        polls.get(poll_id).map_or(0, HashMap::len)
    }

    pub fn poll_count(&self) -> usize {
        self.polls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Keeps an observer registered for as long as it lives.
pub struct Registration {
    registry: Arc<SubscriptionRegistry>,
    poll_id: String,
    id: ObserverId,
}

impl Registration {
    pub fn new(registry: Arc<SubscriptionRegistry>, poll_id: &str, handle: ObserverHandle) -> Self {
        let id = handle.id();
        registry.register(poll_id, handle);

        Self {
            registry,
            poll_id: poll_id.to_string(),
            id,
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.poll_id, self.id);
    }
}
