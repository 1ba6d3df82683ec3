use crate::middleware::auth::basic_auth;
use crate::routes::error::ApiError;
use crate::sseauth;
use crate::AppState;
use axum::extract::State;
use axum::middleware;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;
use vc_core::time::Clock;

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: i64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/token", post(issue_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), basic_auth))
        .with_state(state)
}

/// Mint a short-lived stream token, gated by basic-auth.
#[utoipa::path(
    post,
    path = "/api/v1/auth/token",
    responses(
        (status = 200, body = TokenResponse),
        (status = 401, description = "missing or invalid credentials"),
        (status = 503, description = "token signing not configured")
    )
)]
pub(crate) async fn issue_token(
    State(state): State<AppState>,
) -> Result<Json<TokenResponse>, ApiError> {
    if state.sse_secret.is_empty() {
        return Err(ApiError::ServiceUnavailable(
            "stream tokens not configured".to_string(),
        ));
    }

    let token = sseauth::generate_token(
        &state.sse_secret,
        sseauth::SCOPE_SSE,
        state.clock.now(),
    )
    .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(Json(TokenResponse {
        token,
        expires_in: sseauth::DEFAULT_TTL_SECS,
    }))
}
