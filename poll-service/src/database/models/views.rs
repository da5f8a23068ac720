//! API response view models

use serde::{Deserialize, Serialize};

use super::{PollOptionRecord, PollRecord};
use crate::types::{OptionId, PollId};

/// Option of a poll together with its current tally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOptionView {
    pub id: OptionId,
    pub text: String,
    pub count: u64,
}

/// View of PollRecord for list and detail endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub id: PollId,
    pub question: String,
    pub creator_id: String,
    pub is_published: bool,
    pub created_at: String,
    pub updated_at: String,
    pub options: Vec<PollOptionView>,
    pub total_votes: u64,
}

impl PollView {
    /// Assemble a view; `count_of` supplies the tally for each option id.
    pub fn new(
        poll: PollRecord,
        options: Vec<PollOptionRecord>,
        count_of: impl Fn(OptionId) -> u64,
    ) -> Self {
        let options: Vec<PollOptionView> = options
            .into_iter()
            .map(|o| PollOptionView {
                count: count_of(o.id),
                id: o.id,
                text: o.text,
            })
            .collect();
        let total_votes = options.iter().map(|o| o.count).sum();

        PollView {
            id: poll.id,
            question: poll.question,
            creator_id: poll.creator_id,
            is_published: poll.is_published,
            created_at: poll.created_at,
            updated_at: poll.updated_at,
            options,
            total_votes,
        }
    }
}
