//! # Observer Session
//!
//! One per WebSocket connection, bound to a single poll for its whole life.
//! On joining it registers with the subscription registry, sends the current
//! tally read straight from the store, then services inbound votes and
//! outbound tally updates concurrently until the client goes away. The
//! registration is released on every exit path.

use std::sync::Arc;

use axum::{
    extract::{
        Extension, Path,
        ws::{Message, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{PollError, SessionError, VoteError};
use crate::models::{VoteIntent, poll_key};
use crate::registry::{ObserverId, Outbound, QueueObserver, Registration, SubscriptionRegistry};
use crate::startup::AppState;
use crate::votes::VoteProcessor;

pub async fn poll_socket(
    ws: WebSocketUpgrade,
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, PollError> {
    if app_state.store.read_all(&poll_key(&poll_id)).await?.is_empty() {
        return Err(PollError::PollNotFound);
    }

    let session = Session::new(
        poll_id,
        Arc::clone(&app_state.votes),
        Arc::clone(&app_state.registry),
        app_state.config.outbound_queue,
    );

    Ok(ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        session.run(sink, stream).await;
    }))
}

pub struct Session {
    poll_id: String,
    votes: Arc<VoteProcessor>,
    registry: Arc<SubscriptionRegistry>,
    queue_capacity: usize,
}

impl Session {
    pub fn new(
        poll_id: String,
        votes: Arc<VoteProcessor>,
        registry: Arc<SubscriptionRegistry>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            poll_id,
            votes,
            registry,
            queue_capacity,
        }
    }

    pub async fn run<S, R, E>(self, mut sink: S, stream: R)
    where
        S: Sink<Message> + Unpin + Send,
        S::Error: std::error::Error + Send + Sync + 'static,
        R: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (observer, outbound) = QueueObserver::channel(self.queue_capacity);
        let registration = Registration::new(
            Arc::clone(&self.registry),
            &self.poll_id,
            Arc::new(observer),
        );
        let observer_id = registration.id();
        info!(
            poll_id = %self.poll_id,
            observer = %observer_id,
            observers = self.registry.observer_count(&self.poll_id),
            "Observer joined"
        );

        let result = match self.send_current_tally(&mut sink).await {
            Ok(last_total) => {
                tokio::select! {
                    result = Self::write_updates(sink, outbound, last_total) => result,
                    result = self.read_votes(stream, observer_id) => result,
                }
            }
            Err(e) => Err(e),
        };

        drop(registration);

        match result {
            Ok(()) => info!(poll_id = %self.poll_id, observer = %observer_id, "Observer left"),
            Err(e) => warn!(poll_id = %self.poll_id, observer = %observer_id, "Observer dropped: {e}"),
        }
    }

    async fn send_current_tally<S>(&self, sink: &mut S) -> Result<i64, SessionError>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let snapshot = match self.votes.tally(&self.poll_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // the client still gets live updates once the store recovers
                warn!(poll_id = %self.poll_id, "Failed to read tally for new observer: {e}");
                return Ok(0);
            }
        };

        let text = serde_json::to_string(&snapshot.to_update())?;
        sink.send(Message::Text(text)).await.map_err(transport)?;

        Ok(snapshot.total())
    }

    async fn write_updates<S>(
        mut sink: S,
        mut outbound: mpsc::Receiver<Outbound>,
        mut last_total: i64,
    ) -> Result<(), SessionError>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        while let Some(update) = outbound.recv().await {
            // counters only grow, so a total no larger than the last one is old or already sent
            if update.total <= last_total {
                debug!(total = update.total, last_total, "Skipping stale tally");
                continue;
            }
            last_total = update.total;

            sink.send(Message::Text(update.text.to_string()))
                .await
                .map_err(transport)?;
        }

        Ok(())
    }

    async fn read_votes<R, E>(&self, mut stream: R, observer: ObserverId) -> Result<(), SessionError>
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        while let Some(frame) = stream.next().await {
            match frame.map_err(transport)? {
                Message::Text(text) => self.handle_vote(&text, observer).await,
                Message::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }

    async fn handle_vote(&self, text: &str, observer: ObserverId) {
        let intent = match serde_json::from_str::<VoteIntent>(text) {
            Ok(intent) if intent.is_complete() => intent,
            Ok(_) => {
                debug!(poll_id = %self.poll_id, %observer, "Dropping incomplete vote");
                return;
            }
            Err(e) => {
                debug!(poll_id = %self.poll_id, %observer, "{}", SessionError::from(e));
                return;
            }
        };

        // runs on its own task so a session torn down mid-vote cannot cancel
        // it between the increment and recording the voter
        let submission = {
            let votes = Arc::clone(&self.votes);
            let poll_id = self.poll_id.clone();
            let intent = intent.clone();
            tokio::spawn(async move {
                votes
                    .submit(&poll_id, &intent.vote, &intent.client_id)
                    .await
            })
        };

        let result = match submission.await {
            Ok(result) => result,
            Err(e) => {
                warn!(poll_id = %self.poll_id, client_id = %intent.client_id, "Vote task failed: {e}");
                return;
            }
        };

        match result {
            Ok(_) => {}
            Err(VoteError::DuplicateVote) => {
                debug!(poll_id = %self.poll_id, client_id = %intent.client_id, "Duplicate vote ignored");
            }
            Err(VoteError::UnknownPollOrOption) => {
                warn!(poll_id = %self.poll_id, option_id = %intent.vote, "Vote for unknown option");
            }
            Err(e @ VoteError::StoreUnavailable(_)) => {
                warn!(poll_id = %self.poll_id, client_id = %intent.client_id, "Vote dropped: {e}");
            }
        }
    }
}

fn transport<E>(e: E) -> SessionError
where
    E: std::error::Error + Send + Sync + 'static,
{
    SessionError::Transport(axum::Error::new(e))
}
