//! # Vote Processor
//!
//! Applies one vote: dedup check, atomic increment, record the voter, read the
//! refreshed tally and publish it. The steps are separate store calls with no
//! transaction around them and nothing is rolled back on a later failure.
//!
//! Two simultaneous first votes from the same client can both pass the
//! membership check and both be counted. The insert into the voted set
//! reports that case, and it is logged rather than compensated.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::BroadcastBus;
use crate::error::{StoreError, VoteError};
use crate::models::{TallySnapshot, poll_key, updates_topic, voted_key, votes_field};
use crate::store::CounterStore;

pub struct VoteProcessor {
    store: Arc<dyn CounterStore>,
    bus: Arc<dyn BroadcastBus>,
}

impl VoteProcessor {
    pub fn new(store: Arc<dyn CounterStore>, bus: Arc<dyn BroadcastBus>) -> Self {
        Self { store, bus }
    }

    pub async fn submit(
        &self,
        poll_id: &str,
        option_id: &str,
        client_id: &str,
    ) -> Result<TallySnapshot, VoteError> {
        let poll_key = poll_key(poll_id);
        let voted_key = voted_key(poll_id);

        if self.store.set_contains(&voted_key, client_id).await? {
            debug!(poll_id, client_id, "Client already voted");
            return Err(VoteError::DuplicateVote);
        }

        let count = match self
            .store
            .increment(&poll_key, &votes_field(option_id), 1)
            .await
        {
            Ok(count) => count,
            Err(StoreError::NotFound) => return Err(VoteError::UnknownPollOrOption),
            Err(e) => return Err(e.into()),
        };

        if !self.store.set_add(&voted_key, client_id).await? {
            warn!(
                poll_id,
                client_id, "Concurrent duplicate vote was counted before the voter was recorded"
            );
        }

        info!(poll_id, option_id, count, "Vote recorded");

        let snapshot = self.tally(poll_id).await?;
        let payload = serde_json::to_string(&snapshot.to_update())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        self.bus.publish(&updates_topic(poll_id), &payload).await?;

        Ok(snapshot)
    }

    /// Reads the current counters straight from the store.
    pub async fn tally(&self, poll_id: &str) -> Result<TallySnapshot, StoreError> {
        let fields = self.store.read_all(&poll_key(poll_id)).await?;
        Ok(TallySnapshot::from_fields(poll_id, &fields))
    }
}
