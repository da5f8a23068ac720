pub mod views;

use serde::{Deserialize, Serialize};

use crate::types::{OptionId, PollId};

/// A user's current vote on a poll. At most one exists per (user_id, poll_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BallotRecord {
    pub user_id: String,
    pub poll_id: PollId,
    pub option_id: OptionId,
    pub created_at: String, // ISO8601 UTC timestamp
    pub updated_at: String, // ISO8601 UTC timestamp
}

/// Poll record in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PollRecord {
    pub id: PollId,
    pub question: String,
    pub creator_id: String,
    pub is_published: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Poll option record; `position` is the definition order within the poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PollOptionRecord {
    pub id: OptionId,
    pub poll_id: PollId,
    pub position: i64,
    pub text: String,
}
