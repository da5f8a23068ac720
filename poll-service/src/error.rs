//! Vote errors and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::ledger::LedgerError;
use crate::types::{OptionId, PollId};

/// Caller-visible outcome of a failed vote or tally query. None of these
/// leave a partially applied ballot behind.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("Cannot vote on unpublished poll {0}")]
    PollNotPublished(PollId),

    #[error("Option {option_id} does not belong to poll {poll_id}")]
    InvalidOption { poll_id: PollId, option_id: OptionId },

    #[error("{0} not found")]
    NotFound(String),

    /// The vote did not take effect.
    #[error("Vote not recorded: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for VoteError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { poll_id, option_id } => {
                VoteError::NotFound(format!("Poll {} or option {}", poll_id, option_id))
            }
            err @ (LedgerError::AlreadyVoted { .. } | LedgerError::Conflict { .. }) => {
                VoteError::Conflict(err.to_string())
            }
            LedgerError::Database(e) => VoteError::Storage(e),
        }
    }
}

impl VoteError {
    pub fn status(&self) -> StatusCode {
        match self {
            VoteError::PollNotPublished(_) => StatusCode::BAD_REQUEST,
            VoteError::InvalidOption { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            VoteError::NotFound(_) => StatusCode::NOT_FOUND,
            VoteError::Conflict(_) => StatusCode::CONFLICT,
            VoteError::Storage(_) | VoteError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned by the HTTP handlers: `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<VoteError> for ApiError {
    fn from(err: VoteError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            warn!("Vote request failed: {}", err);
            // Storage details stay in the log
            return Self::new(status, "Failed to process vote");
        }
        Self::new(status, err.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        VoteError::from(err).into()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        VoteError::Storage(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
