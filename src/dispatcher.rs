//! # Fan-out Dispatcher
//!
//! One task per process consumes every `updates:*` message from the bus and
//! hands it to each observer of that poll. Delivery is a non-blocking push
//! into the observer's bounded queue, so a slow client only ever loses its
//! own intermediate updates; the next full tally supersedes them.
//!
//! The task lives as long as the process. When the bus subscription ends it
//! subscribes again with a bounded backoff.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bus::{BroadcastBus, BusMessage, BusStream};
use crate::error::{DeliveryError, StoreError};
use crate::models::{TallyUpdate, UPDATES_PATTERN, poll_id_from_topic};
use crate::registry::{Outbound, SubscriptionRegistry};

const RESUBSCRIBE_MIN_BACKOFF: Duration = Duration::from_millis(100);
const RESUBSCRIBE_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Result of fanning out one bus message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    pub matched: usize,
    pub delivered: usize,
    pub dropped: usize,
}

pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Subscribes before returning, so nothing published afterwards is missed.
    pub async fn spawn(self, bus: Arc<dyn BroadcastBus>) -> Result<JoinHandle<()>, StoreError> {
        let messages = bus.subscribe_wildcard(UPDATES_PATTERN).await?;
        info!("Fan-out dispatcher subscribed to {UPDATES_PATTERN}");

        Ok(tokio::spawn(self.run(bus, messages)))
    }

    async fn run(self, bus: Arc<dyn BroadcastBus>, mut messages: BusStream) {
        loop {
            while let Some(message) = messages.next().await {
                self.dispatch(&message);
            }
            warn!("Broadcast bus subscription ended, resubscribing");
            messages = resubscribe(bus.as_ref()).await;
        }
    }

    pub fn dispatch(&self, message: &BusMessage) -> DispatchResult {
        let mut result = DispatchResult::default();

        let Some(poll_id) = poll_id_from_topic(&message.topic) else {
            debug!(topic = %message.topic, "Skipping message on unexpected topic");
            return result;
        };

        let update: TallyUpdate = match serde_json::from_str(&message.payload) {
            Ok(update) => update,
            Err(e) => {
                warn!(poll_id, "Failed to decode tally update: {e}");
                return result;
            }
        };

        let observers = self.registry.snapshot(poll_id);
        result.matched = observers.len();
        if observers.is_empty() {
            return result;
        }

        // re-encoded so only the fields clients expect leave the process
        let text = match serde_json::to_string(&update) {
            Ok(text) => text,
            Err(e) => {
                warn!(poll_id, "Failed to encode tally update: {e}");
                return result;
            }
        };

        let outbound = Outbound {
            total: update.total(),
            text: Arc::from(text),
        };

        for observer in observers {
            match observer.deliver(outbound.clone()) {
                Ok(()) => result.delivered += 1,
                Err(DeliveryError::Full) => {
                    result.dropped += 1;
                    warn!(poll_id, observer = %observer.id(), "Observer queue full, update dropped");
                }
                Err(DeliveryError::Closed) => {
                    result.dropped += 1;
                    debug!(poll_id, observer = %observer.id(), "Observer already closed");
                }
            }
        }

        result
    }
}

async fn resubscribe(bus: &dyn BroadcastBus) -> BusStream {
    let mut backoff = RESUBSCRIBE_MIN_BACKOFF;
    loop {
        sleep(backoff).await;
        match bus.subscribe_wildcard(UPDATES_PATTERN).await {
            Ok(messages) => {
                info!("Fan-out dispatcher resubscribed to {UPDATES_PATTERN}");
                return messages;
            }
            Err(e) => {
                backoff = (backoff * 2).min(RESUBSCRIBE_MAX_BACKOFF);
                error!("Failed to resubscribe to broadcast bus: {e}, retrying in {backoff:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::stream;
    use tokio::time::timeout;

    use super::*;
    use crate::bus::MemoryBus;
    use crate::registry::{ObserverHandle, QueueObserver};

    fn message(topic: &str, payload: &str) -> BusMessage {
        BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        }
    }

    fn observer(capacity: usize) -> (ObserverHandle, tokio::sync::mpsc::Receiver<Outbound>) {
        let (observer, rx) = QueueObserver::channel(capacity);
        (Arc::new(observer), rx)
    }

    const UPDATE: &str = r#"{"type":"voteUpdate","votes":{"0":1,"1":1}}"#;

    #[tokio::test]
    async fn test_dispatch_reaches_every_observer_of_the_poll() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (first, mut rx1) = observer(4);
        let (second, mut rx2) = observer(4);
        let (other, mut rx3) = observer(4);
        registry.register("p1", first);
        registry.register("p1", second);
        registry.register("p2", other);

        let dispatcher = Dispatcher::new(registry);
        let result = dispatcher.dispatch(&message("updates:p1", UPDATE));

        assert_eq!(
            result,
            DispatchResult {
                matched: 2,
                delivered: 2,
                dropped: 0
            }
        );
        assert_eq!(rx1.recv().await.unwrap().total, 2);
        assert_eq!(&*rx2.recv().await.unwrap().text, UPDATE);
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_observer_does_not_stop_delivery() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (gone, rx_gone) = observer(4);
        let (live, mut rx_live) = observer(4);
        registry.register("p1", gone);
        registry.register("p1", live);
        drop(rx_gone);

        let dispatcher = Dispatcher::new(registry);
        let result = dispatcher.dispatch(&message("updates:p1", UPDATE));

        assert_eq!(result.matched, 2);
        assert_eq!(result.delivered, 1);
        assert_eq!(result.dropped, 1);
        assert!(rx_live.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_slow_observer_does_not_block_others() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (slow, _rx_slow) = observer(1);
        let (fast, mut rx_fast) = observer(16);
        registry.register("p1", slow);
        registry.register("p1", fast);

        let dispatcher = Dispatcher::new(registry);
        for _ in 0..10 {
            dispatcher.dispatch(&message("updates:p1", UPDATE));
        }

        for _ in 0..10 {
            assert!(rx_fast.recv().await.is_some());
        }
    }

    #[test]
    fn test_bad_topics_and_payloads_are_skipped() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (handle, mut rx) = observer(4);
        registry.register("p1", handle);

        let dispatcher = Dispatcher::new(registry);
        assert_eq!(
            dispatcher.dispatch(&message("updates:p1:extra", UPDATE)),
            DispatchResult::default()
        );
        assert_eq!(
            dispatcher.dispatch(&message("updates:p1", "not json")),
            DispatchResult::default()
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_observers() {
        let dispatcher = Dispatcher::new(Arc::new(SubscriptionRegistry::new()));
        assert_eq!(
            dispatcher.dispatch(&message("updates:p9", UPDATE)),
            DispatchResult::default()
        );
    }

    #[tokio::test]
    async fn test_spawned_dispatcher_routes_bus_messages() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let bus = Arc::new(MemoryBus::new());
        let (handle, mut rx) = observer(4);
        registry.register("p1", handle);

        let task = Dispatcher::new(Arc::clone(&registry))
            .spawn(bus.clone())
            .await
            .unwrap();

        bus.publish("updates:p1", UPDATE).await.unwrap();

        let outbound = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&*outbound.text, UPDATE);

        task.abort();
    }

    #[test]
    fn test_extra_payload_fields_are_not_forwarded() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (handle, mut rx) = observer(4);
        registry.register("p1", handle);

        let dispatcher = Dispatcher::new(registry);
        let result = dispatcher.dispatch(&message(
            "updates:p1",
            r#"{"type":"voteUpdate","votes":{"0":1,"1":1},"debug":"internal"}"#,
        ));

        assert_eq!(result.delivered, 1);
        assert_eq!(&*rx.try_recv().unwrap().text, UPDATE);
    }

    /// Hands out queued subscription results, then streams that never end.
    struct FlakyBus {
        subscriptions: Mutex<VecDeque<Result<BusStream, StoreError>>>,
    }

    #[async_trait]
    impl BroadcastBus for FlakyBus {
        async fn publish(&self, _topic: &str, _payload: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn subscribe_wildcard(&self, _pattern: &str) -> Result<BusStream, StoreError> {
            self.subscriptions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(stream::pending::<BusMessage>().boxed()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_resubscribes_after_stream_ends() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (handle, mut rx) = observer(4);
        registry.register("p1", handle);

        let bus = Arc::new(FlakyBus {
            subscriptions: Mutex::new(VecDeque::from([
                Ok(stream::empty::<BusMessage>().boxed()),
                Err(StoreError::Unavailable("connection refused".to_string())),
                Ok(stream::iter(vec![message("updates:p1", UPDATE)])
                    .chain(stream::pending())
                    .boxed()),
            ])),
        });

        let task = Dispatcher::new(registry).spawn(bus.clone()).await.unwrap();

        let outbound = timeout(Duration::from_secs(30), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outbound.total, 2);
        assert!(bus.subscriptions.lock().unwrap().is_empty());
        assert!(!task.is_finished());

        task.abort();
    }
}
