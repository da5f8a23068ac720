//! Poll directory endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use tracing::info;

use crate::auth_middleware::UserId;
use crate::database::models::views::PollView;
use crate::database::models::{PollOptionRecord, PollRecord};
use crate::error::ApiError;
use crate::ledger::LedgerStore;
use crate::state::AppState;
use crate::tally::PollSnapshot;
use crate::types::{CreatePollRequest, PollId, UpdatePollRequest};

const MIN_OPTIONS: usize = 2;

/// POST /polls
pub async fn handle_create_poll(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Json(req): Json<CreatePollRequest>,
) -> Result<(StatusCode, Json<PollView>), ApiError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ApiError::bad_request("Question is required"));
    }

    let options: Vec<String> = req.options.iter().map(|o| o.trim().to_string()).collect();
    if options.iter().any(String::is_empty) {
        return Err(ApiError::bad_request("Option text cannot be empty"));
    }
    if options.len() < MIN_OPTIONS {
        return Err(ApiError::bad_request(format!(
            "A poll needs at least {} options",
            MIN_OPTIONS
        )));
    }

    let published = req.published.unwrap_or(true);
    let (poll, options) =
        PollRecord::insert_with_options(state.db.pool(), question, &user_id, published, &options)
            .await?;
    info!("User {} created poll {} ({} options)", user_id, poll.id, options.len());

    Ok((StatusCode::CREATED, Json(PollView::new(poll, options, |_| 0))))
}

/// GET /polls - published polls, newest first
pub async fn handle_list_polls(
    State(state): State<AppState>,
) -> Result<Json<Vec<PollView>>, ApiError> {
    let polls = PollRecord::list_published(state.db.pool()).await?;

    let mut views = Vec::with_capacity(polls.len());
    for poll in polls {
        views.push(poll_view(&state, poll).await?);
    }
    Ok(Json(views))
}

/// GET /polls/{id}
pub async fn handle_get_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<PollId>,
) -> Result<Json<PollView>, ApiError> {
    let poll = PollRecord::get(state.db.pool(), poll_id)
        .await?
        .ok_or_else(|| poll_not_found(poll_id))?;
    Ok(Json(poll_view(&state, poll).await?))
}

/// PUT /polls/{id}
pub async fn handle_update_poll(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(poll_id): Path<PollId>,
    Json(req): Json<UpdatePollRequest>,
) -> Result<Json<PollView>, ApiError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ApiError::bad_request("Question is required"));
    }

    owned_poll(&state, poll_id, &user_id).await?;
    let poll = PollRecord::update_question(state.db.pool(), poll_id, question)
        .await?
        .ok_or_else(|| poll_not_found(poll_id))?;
    info!("User {} updated poll {}", user_id, poll_id);

    Ok(Json(poll_view(&state, poll).await?))
}

/// POST /polls/{id}/publish
pub async fn handle_publish_poll(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(poll_id): Path<PollId>,
) -> Result<Json<PollView>, ApiError> {
    owned_poll(&state, poll_id, &user_id).await?;
    let poll = PollRecord::publish(state.db.pool(), poll_id)
        .await?
        .ok_or_else(|| poll_not_found(poll_id))?;
    info!("User {} published poll {}", user_id, poll_id);

    Ok(Json(poll_view(&state, poll).await?))
}

/// DELETE /polls/{id}
pub async fn handle_delete_poll(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(poll_id): Path<PollId>,
) -> Result<StatusCode, ApiError> {
    owned_poll(&state, poll_id, &user_id).await?;
    if !PollRecord::delete(state.db.pool(), poll_id).await? {
        return Err(poll_not_found(poll_id));
    }
    state.coordinator.forget_poll(poll_id);
    info!("User {} deleted poll {}", user_id, poll_id);

    Ok(StatusCode::NO_CONTENT)
}

/// GET /polls/{id}/tally
pub async fn handle_get_tally(
    State(state): State<AppState>,
    Path(poll_id): Path<PollId>,
) -> Result<Json<PollSnapshot>, ApiError> {
    Ok(Json(state.coordinator.projector().project(poll_id).await?))
}

async fn owned_poll(
    state: &AppState,
    poll_id: PollId,
    user_id: &str,
) -> Result<PollRecord, ApiError> {
    let poll = PollRecord::get(state.db.pool(), poll_id)
        .await?
        .ok_or_else(|| poll_not_found(poll_id))?;
    if poll.creator_id != user_id {
        info!("User {} denied access to poll {}", user_id, poll_id);
        return Err(ApiError::forbidden("Only the poll creator can modify it"));
    }
    Ok(poll)
}

async fn poll_view(state: &AppState, poll: PollRecord) -> Result<PollView, ApiError> {
    let options = PollOptionRecord::list_for_poll(state.db.pool(), poll.id).await?;
    let counts = state.ledger.counts_by_option(poll.id).await?;
    Ok(PollView::new(poll, options, |id| counts.get(&id).copied().unwrap_or(0)))
}

fn poll_not_found(poll_id: PollId) -> ApiError {
    ApiError::not_found(format!("Poll {} not found", poll_id))
}
