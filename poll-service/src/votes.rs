//! Vote endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use tracing::debug;

use crate::auth_middleware::UserId;
use crate::database::models::{BallotRecord, PollRecord};
use crate::directory::PollDirectory;
use crate::error::ApiError;
use crate::ledger::LedgerStore;
use crate::state::AppState;
use crate::tally::PollSnapshot;
use crate::types::{PollId, VoteRequest};

/// POST /votes and PUT /votes - cast or change the caller's vote and return
/// the poll's tally including it
pub async fn handle_cast_vote(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<PollSnapshot>, ApiError> {
    let poll_id = match req.poll_id {
        Some(poll_id) => poll_id,
        None => state
            .directory
            .poll_of_option(req.option_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Option {} not found", req.option_id)))?,
    };
    debug!("User {} voting option {} on poll {}", user_id, req.option_id, poll_id);

    let snapshot = state
        .coordinator
        .cast_vote(&user_id, poll_id, req.option_id)
        .await?;
    Ok(Json(snapshot))
}

/// GET /votes/mine
pub async fn handle_my_votes(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
) -> Result<Json<Vec<BallotRecord>>, ApiError> {
    Ok(Json(state.ledger.ballots_for_user(&user_id).await?))
}

/// GET /votes/poll/{id}
pub async fn handle_poll_votes(
    State(state): State<AppState>,
    Path(poll_id): Path<PollId>,
) -> Result<Json<Vec<BallotRecord>>, ApiError> {
    if PollRecord::get(state.db.pool(), poll_id).await?.is_none() {
        return Err(ApiError::not_found(format!("Poll {} not found", poll_id)));
    }
    Ok(Json(state.ledger.ballots_for_poll(poll_id).await?))
}
