//! HTTP router and service endpoints

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::auth_middleware::{auth_middleware, handle_issue_token};
use crate::database::constants::CURRENT_SCHEMA_VERSION;
use crate::metrics;
use crate::polls::{
    handle_create_poll, handle_delete_poll, handle_get_poll, handle_get_tally, handle_list_polls,
    handle_publish_poll, handle_update_poll,
};
use crate::state::AppState;
use crate::votes::{handle_cast_vote, handle_my_votes, handle_poll_votes};
use crate::ws_server::handle_ws;

pub const METRICS_TOKEN_HEADER: &str = "x-metrics-token";

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/polls", post(handle_create_poll))
        .route("/polls/{id}", put(handle_update_poll).delete(handle_delete_poll))
        .route("/polls/{id}/publish", post(handle_publish_poll))
        .route("/votes", post(handle_cast_vote).put(handle_cast_vote))
        .route("/votes/mine", get(handle_my_votes))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/healthz", get(handle_health))
        .route("/meta", get(handle_meta))
        .route("/admin/stats", get(handle_admin_stats))
        .route("/auth/token", post(handle_issue_token))
        .route("/polls", get(handle_list_polls))
        .route("/polls/{id}", get(handle_get_poll))
        .route("/polls/{id}/tally", get(handle_get_tally))
        .route("/votes/poll/{id}", get(handle_poll_votes))
        .route("/ws", get(handle_ws))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_meta(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "git_hash": option_env!("POLL_BUILD_GIT_HASH").unwrap_or("unknown"),
        "build_time_unix": option_env!("POLL_BUILD_TIME_UNIX").and_then(|t| t.parse::<u64>().ok()),
        "schema_version": CURRENT_SCHEMA_VERSION,
        "vote_policy": state.config.vote_policy.as_str(),
        "live_subscribers": state.registry.subscriber_count(),
        "watched_polls": state.registry.watched_poll_count(),
    }))
}

async fn handle_admin_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let Some(expected) = state.config.metrics_token.as_deref() else {
        return Err(StatusCode::NOT_FOUND);
    };

    let presented = headers
        .get(METRICS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(expected) {
        info!("Rejected /admin/stats request with missing or invalid token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(Json(metrics::snapshot_as_json(
        state.db.location(),
        state.registry.subscriber_count(),
    )))
}
