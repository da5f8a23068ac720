//! Tally projection: per-option counts of a poll, derived from the ledger.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::directory::{PollDirectory, PollOutline};
use crate::error::VoteError;
use crate::ledger::{LedgerError, LedgerStore};
use crate::types::{OptionId, PollId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionTally {
    pub option_id: OptionId,
    pub count: u64,
}

/// Point-in-time tally of one poll, options in definition order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub poll_id: PollId,
    pub options: Vec<OptionTally>,
}

impl PollSnapshot {
    /// Every option of `outline`, zero counts included.
    pub fn assemble(outline: &PollOutline, counts: &HashMap<OptionId, u64>) -> Self {
        PollSnapshot {
            poll_id: outline.poll_id,
            options: outline
                .option_ids
                .iter()
                .map(|&option_id| OptionTally {
                    option_id,
                    count: counts.get(&option_id).copied().unwrap_or(0),
                })
                .collect(),
        }
    }

    pub fn total(&self) -> u64 {
        self.options.iter().map(|o| o.count).sum()
    }

    pub fn count_for(&self, option_id: OptionId) -> Option<u64> {
        self.options
            .iter()
            .find(|o| o.option_id == option_id)
            .map(|o| o.count)
    }
}

#[derive(Clone)]
pub struct TallyProjector {
    ledger: Arc<dyn LedgerStore>,
    directory: Arc<dyn PollDirectory>,
}

impl TallyProjector {
    pub fn new(ledger: Arc<dyn LedgerStore>, directory: Arc<dyn PollDirectory>) -> Self {
        Self { ledger, directory }
    }

    pub async fn project(&self, poll_id: PollId) -> Result<PollSnapshot, VoteError> {
        let outline = self
            .directory
            .outline(poll_id)
            .await?
            .ok_or_else(|| VoteError::NotFound(format!("Poll {}", poll_id)))?;

        Ok(self.project_outline(&outline).await?)
    }

    /// Project a poll whose outline the caller already holds
    pub async fn project_outline(
        &self,
        outline: &PollOutline,
    ) -> Result<PollSnapshot, LedgerError> {
        let counts = self.ledger.counts_by_option(outline.poll_id).await?;
        Ok(PollSnapshot::assemble(outline, &counts))
    }
}
