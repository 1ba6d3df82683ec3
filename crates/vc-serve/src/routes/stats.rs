use crate::middleware::auth::basic_auth;
use crate::routes::error::ApiError;
use crate::{open_store, AppState};
use axum::extract::State;
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;
use vc_db::stats::today_boundary;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub today_joins: i64,
    pub today_leaves: i64,
    pub today_world_changes: i64,
    pub recent_players: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stats/basic", get(basic_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), basic_auth))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/v1/stats/basic",
    responses((status = 200, body = StatsResponse))
)]
pub(crate) async fn basic_stats(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, ApiError> {
    let store = open_store(&state)?;
    let (since, until) = today_boundary();
    let stats = store.get_basic_stats(since, until)?;

    Ok(Json(StatsResponse {
        today_joins: stats.join_count,
        today_leaves: stats.leave_count,
        today_world_changes: stats.world_change_count,
        recent_players: stats.recent_players,
        last_event_at: stats.last_event_at,
    }))
}
