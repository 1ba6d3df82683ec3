use crate::middleware::auth::basic_auth;
use crate::AppState;
use axum::extract::State;
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;
use vc_core::derive::{PlayerInfo, WorldInfo};

#[derive(Debug, Serialize, ToSchema)]
pub struct NowResponse {
    pub world: Option<WorldInfo>,
    pub players: Vec<PlayerInfo>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/now", get(now))
        .route_layer(middleware::from_fn_with_state(state.clone(), basic_auth))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/v1/now",
    responses((status = 200, body = NowResponse))
)]
pub(crate) async fn now(State(state): State<AppState>) -> Json<NowResponse> {
    let mut players = state.derive.current_players();
    players.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
    Json(NowResponse {
        world: state.derive.current_world(),
        players,
    })
}
