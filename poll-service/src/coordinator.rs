//! Vote coordination: validation, the ledger write, and the broadcast that
//! follows it.
//!
//! Votes on one poll validate concurrently. From the ledger write through
//! the publish, each poll has a lane that admits one vote at a time, so the
//! snapshots a subscriber receives follow the order in which the ballots
//! were committed. Lanes of different polls never contend.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::broadcast::BroadcastDispatcher;
use crate::directory::{PollDirectory, PollOutline};
use crate::error::VoteError;
use crate::ledger::LedgerStore;
use crate::metrics::{self, VoteOutcome};
use crate::protocol::ServerMessage;
use crate::subscription::ChannelHandle;
use crate::tally::{PollSnapshot, TallyProjector};
use crate::types::{OptionId, PollId};

/// What a second vote by the same user on the same poll does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VotePolicy {
    /// Replace the previous ballot.
    #[default]
    Overwrite,
    /// Keep the first ballot and reject the new vote as a conflict.
    CreateOnly,
}

impl VotePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            VotePolicy::Overwrite => "overwrite",
            VotePolicy::CreateOnly => "create_only",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown vote policy '{0}', expected 'overwrite' or 'create_only'")]
pub struct UnknownVotePolicy(String);

impl FromStr for VotePolicy {
    type Err = UnknownVotePolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(VotePolicy::Overwrite),
            "create_only" | "create-only" => Ok(VotePolicy::CreateOnly),
            other => Err(UnknownVotePolicy(other.to_string())),
        }
    }
}

#[derive(Default)]
struct PollLanes {
    lanes: Mutex<HashMap<PollId, Arc<AsyncMutex<()>>>>,
}

impl PollLanes {
    fn lane(&self, poll_id: PollId) -> Arc<AsyncMutex<()>> {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(poll_id)
            .or_default()
            .clone()
    }

    /// Wait for the poll's lane and hold it until the returned turn drops.
    async fn enter(self: &Arc<Self>, poll_id: PollId) -> LaneTurn {
        let lane = self.lane(poll_id);
        let guard = lane.clone().lock_owned().await;
        LaneTurn {
            lanes: self.clone(),
            poll_id,
            lane,
            guard: Some(guard),
        }
    }

    /// Drop the lane from the map if nobody else holds or waits on it.
    fn release(&self, poll_id: PollId, lane: &Arc<AsyncMutex<()>>) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in the caller
        if Arc::strong_count(lane) == 2
            && lanes.get(&poll_id).is_some_and(|current| Arc::ptr_eq(current, lane))
        {
            lanes.remove(&poll_id);
        }
    }

    fn forget(&self, poll_id: PollId) {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&poll_id);
    }
}

struct LaneTurn {
    lanes: Arc<PollLanes>,
    poll_id: PollId,
    lane: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LaneTurn {
    fn drop(&mut self) {
        self.guard.take();
        self.lanes.release(self.poll_id, &self.lane);
    }
}

#[derive(Clone)]
pub struct VoteCoordinator {
    directory: Arc<dyn PollDirectory>,
    ledger: Arc<dyn LedgerStore>,
    projector: TallyProjector,
    dispatcher: BroadcastDispatcher,
    policy: VotePolicy,
    lanes: Arc<PollLanes>,
}

impl VoteCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        directory: Arc<dyn PollDirectory>,
        dispatcher: BroadcastDispatcher,
        policy: VotePolicy,
    ) -> Self {
        Self {
            projector: TallyProjector::new(ledger.clone(), directory.clone()),
            directory,
            ledger,
            dispatcher,
            policy,
            lanes: Arc::new(PollLanes::default()),
        }
    }

    pub fn projector(&self) -> &TallyProjector {
        &self.projector
    }

    /// Record `user_id`'s vote for `option_id` on `poll_id`, broadcast the
    /// new tally to the poll's subscribers and return it.
    pub async fn cast_vote(
        &self,
        user_id: &str,
        poll_id: PollId,
        option_id: OptionId,
    ) -> Result<PollSnapshot, VoteError> {
        let result = self.validate_and_commit(user_id, poll_id, option_id).await;
        metrics::record_vote_outcome(VoteOutcome::of(&result));
        result
    }

    async fn validate_and_commit(
        &self,
        user_id: &str,
        poll_id: PollId,
        option_id: OptionId,
    ) -> Result<PollSnapshot, VoteError> {
        let outline = self
            .directory
            .outline(poll_id)
            .await?
            .ok_or_else(|| VoteError::NotFound(format!("Poll {}", poll_id)))?;

        if !outline.published {
            return Err(VoteError::PollNotPublished(poll_id));
        }
        if !outline.has_option(option_id) {
            return match self.directory.poll_of_option(option_id).await? {
                Some(_) => Err(VoteError::InvalidOption { poll_id, option_id }),
                None => Err(VoteError::NotFound(format!("Option {}", option_id))),
            };
        }

        // The commit runs in its own task: once the ballot is written it is
        // broadcast even if the requesting connection goes away.
        let coordinator = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            coordinator.commit(&user_id, &outline, option_id).await
        })
        .await
            .map_err(|e| VoteError::Internal(format!("vote task failed: {}", e)))?
    }

    async fn commit(
        &self,
        user_id: &str,
        outline: &PollOutline,
        option_id: OptionId,
    ) -> Result<PollSnapshot, VoteError> {
        let poll_id = outline.poll_id;
        let _turn = self.lanes.enter(poll_id).await;

        let ballot = match self.policy {
            VotePolicy::Overwrite => {
                self.ledger.upsert_ballot(user_id, poll_id, option_id).await?
            }
            VotePolicy::CreateOnly => {
                self.ledger.create_ballot(user_id, poll_id, option_id).await?
            }
        };
        info!(
            "Recorded ballot: user {} poll {} option {} at {}",
            ballot.user_id, ballot.poll_id, ballot.option_id, ballot.updated_at
        );

        let snapshot = self.projector.project_outline(outline).await?;
        self.dispatcher.publish(&snapshot);

        Ok(snapshot)
    }

    /// Subscribe `handle` to `poll_id` and send it the current tally.
    ///
    /// Runs in the poll's lane, so the initial snapshot is never newer than
    /// the first broadcast the channel receives after it.
    pub async fn watch(
        &self,
        poll_id: PollId,
        handle: ChannelHandle,
    ) -> Result<PollSnapshot, VoteError> {
        let outline = self
            .directory
            .outline(poll_id)
            .await?
            .ok_or_else(|| VoteError::NotFound(format!("Poll {}", poll_id)))?;

        let _turn = self.lanes.enter(poll_id).await;

        let snapshot = self.projector.project_outline(&outline).await?;
        self.dispatcher.registry().subscribe(poll_id, handle.clone());
        if handle
            .send(ServerMessage::Joined { poll_id })
            .and_then(|_| handle.send(ServerMessage::PollUpdate(snapshot.clone())))
            .is_err()
        {
            debug!("Channel {} closed while joining poll {}", handle.id(), poll_id);
            self.dispatcher.registry().unsubscribe(&handle.id());
        }

        Ok(snapshot)
    }

    /// Drop per-poll state once a poll is deleted.
    pub fn forget_poll(&self, poll_id: PollId) {
        self.lanes.forget(poll_id);
    }
}
