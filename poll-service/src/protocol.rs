//! WebSocket protocol message types.

use serde::{Deserialize, Serialize};

use crate::tally::PollSnapshot;
use crate::types::PollId;

/// Message sent from a viewer to the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving tally updates for a poll. Replaces any previous poll.
    JoinPoll {
        #[serde(rename = "pollId")]
        poll_id: PollId,
    },
    /// Stop receiving tally updates.
    LeavePoll,
    Ping,
}

/// Message sent from the server to a viewer, as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Fresh tally of the joined poll.
    PollUpdate(PollSnapshot),
    Joined {
        #[serde(rename = "pollId")]
        poll_id: PollId,
    },
    Left,
    Pong,
    Error { message: String },
}
