use crate::error::{PollError, StoreError};
use crate::models::{Poll, poll_key, voted_key};
use crate::startup::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

const ID_ATTEMPTS: usize = 5;
// Keeps the voted set alive from creation so it can carry the poll's TTL.
// Client ids are never empty, so it cannot collide with a real voter.
const VOTED_PLACEHOLDER: &str = "";

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatePollResponse {
    pub id: String,
    pub url: String,
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}

/// Create a poll with zeroed counters
pub async fn create_poll(
    Extension(app_state): Extension<AppState>,
    Json(payload): Json<CreatePollRequest>,
) -> Result<impl IntoResponse, PollError> {
    let question = payload.question.trim();
    if question.is_empty() || payload.options.len() < 2 {
        return Err(PollError::InvalidRequest);
    }

    let store = &app_state.store;
    let mut free_id = None;
    for _ in 0..ID_ATTEMPTS {
        let candidate = generate_id();
        if store.read_all(&poll_key(&candidate)).await?.is_empty() {
            free_id = Some(candidate);
            break;
        }
    }
    let Some(poll_id) = free_id else {
        warn!(attempts = ID_ATTEMPTS, "No free poll id");
        return Err(StoreError::Unavailable("no free poll id".to_string()).into());
    };

    let ttl = app_state.config.poll_ttl;
    store
        .create(
            &poll_key(&poll_id),
            Poll::initial_fields(question, &payload.options),
            ttl,
        )
        .await?;

    let voted_key = voted_key(&poll_id);
    store.set_add(&voted_key, VOTED_PLACEHOLDER).await?;
    store.expire(&voted_key, ttl).await?;

    info!(poll_id = %poll_id, options = payload.options.len(), "Poll created");

    let response = CreatePollResponse {
        url: format!("/poll.html?id={poll_id}"),
        id: poll_id,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Get a poll with its options and vote counts
pub async fn get_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, PollError> {
    let fields = app_state.store.read_all(&poll_key(&poll_id)).await?;
    if fields.is_empty() {
        return Err(PollError::PollNotFound);
    }

    Ok((StatusCode::OK, Json(Poll::from_fields(&poll_id, &fields))))
}
