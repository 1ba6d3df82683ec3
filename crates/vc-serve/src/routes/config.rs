use crate::middleware::auth::basic_auth;
use crate::routes::error::ApiError;
use crate::AppState;
use axum::extract::State;
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use vc_core::config::Config;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/config", get(get_config).put(put_config))
        .route_layer(middleware::from_fn_with_state(state.clone(), basic_auth))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/v1/config",
    responses((status = 200, body = Config))
)]
pub(crate) async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json(Config::load_from(&state.config_path))
}

/// Replace the non-secret config. Values are normalized before the atomic
/// save; most changes take effect on restart.
#[utoipa::path(
    put,
    path = "/api/v1/config",
    request_body = Config,
    responses(
        (status = 200, body = Config),
        (status = 400, description = "invalid config body")
    )
)]
pub(crate) async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<Config>,
) -> Result<Json<Config>, ApiError> {
    if config.batch_delay_secs > 3600 {
        return Err(ApiError::BadRequest(
            "batch_delay_secs out of range".to_string(),
        ));
    }

    let config = config.normalized();
    config
        .save_to(&state.config_path)
        .map_err(|err| ApiError::Internal(format!("save config: {err}")))?;
    Ok(Json(config))
}
