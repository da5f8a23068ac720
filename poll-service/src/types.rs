//! Identifiers and types for HTTP requests and responses

use serde::{Deserialize, Serialize};

/// Poll identifier, assigned by the poll directory
pub type PollId = i64;

/// Option identifier, unique across all polls
pub type OptionId = i64;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_id: OptionId,
    /// Resolved from the option when omitted
    pub poll_id: Option<PollId>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
    pub published: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePollRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: u64,
}
