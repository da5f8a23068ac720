//! Bearer-token authentication for the poll and vote endpoints

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;
use crate::types::{TokenRequest, TokenResponse};

pub const AUTH_SECRET_HEADER: &str = "x-auth-secret";

/// Authenticated caller, inserted as a request extension by [`auth_middleware`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

/// Middleware that resolves the bearer token to the user it was issued for.
pub async fn auth_middleware(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer_token(&headers)?;

    let Some(user_id) = app_state.token_store.resolve(token) else {
        info!("Rejected unknown or expired token for {}", request.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    };

    request.extensions_mut().insert(UserId(user_id));
    Ok(next.run(request).await)
}

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let auth_header = headers
        .get("authorization")
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(StatusCode::BAD_REQUEST)
}

/// POST /auth/token - issue a bearer token for a user id vouched for by the
/// caller holding the shared secret
pub async fn handle_issue_token(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Some(secret) = app_state.config.auth_secret.as_deref() else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Token issuance is disabled",
        ));
    };

    let presented = headers
        .get(AUTH_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented != secret {
        info!("Token request with invalid secret");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Invalid auth secret"));
    }

    let user_id = req.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::bad_request("userId is required"));
    }

    let token = app_state.token_store.create_token(user_id);
    info!("Issued token for user {}", user_id);

    Ok(Json(TokenResponse {
        token,
        expires_in: app_state.token_store.ttl().as_secs(),
    }))
}
