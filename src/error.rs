use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Key or field not found")]
    NotFound,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("Client already voted on this poll")]
    DuplicateVote,
    #[error("Unknown poll or option")]
    UnknownPollOrOption,
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport failure: {0}")]
    Transport(#[from] axum::Error),
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Outbound queue full")]
    Full,
    #[error("Observer closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Invalid request")]
    InvalidRequest,
    #[error("Poll not found")]
    PollNotFound,
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            PollError::InvalidRequest => (
                StatusCode::BAD_REQUEST,
                "Question and at least 2 options required",
            ),
            PollError::PollNotFound => (StatusCode::NOT_FOUND, "Poll not found"),
            PollError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Store error"),
        };

        let body = Json(json!({
            "error": error_message,
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(error: redis::RedisError) -> Self {
        StoreError::Unavailable(error.to_string())
    }
}
